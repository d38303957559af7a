use crate::buffer::OutputBuffer;
use crate::format::*;

/// Push-model MessagePack token writer over an [`OutputBuffer`].
///
/// Each `write_*` call appends exactly one token (or one header). Integer
/// encodings always pick the shortest representation that fits the value.
pub struct Writer<'a> {
    buffer: &'a mut OutputBuffer,
}

impl<'a> Writer<'a> {
    pub fn new(buffer: &'a mut OutputBuffer) -> Writer<'a> {
        Writer { buffer }
    }

    pub fn written(&self) -> usize {
        self.buffer.len()
    }

    pub fn write_nil(&mut self) {
        self.buffer.put_u8(NIL.0);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buffer.put_u8(if value { TRUE.0 } else { FALSE.0 });
    }

    pub fn write_uint(&mut self, value: u64) {
        match value {
            0..=0x7f => self.buffer.put_u8(value as u8),
            0x80..=0xff => {
                self.buffer.put_slice(&[UINT8.0, value as u8]);
            }
            0x100..=0xffff => {
                self.buffer.put_u8(UINT16.0);
                self.buffer.put_slice(&(value as u16).to_be_bytes());
            }
            0x1_0000..=0xffff_ffff => {
                self.buffer.put_u8(UINT32.0);
                self.buffer.put_slice(&(value as u32).to_be_bytes());
            }
            _ => {
                self.buffer.put_u8(UINT64.0);
                self.buffer.put_slice(&value.to_be_bytes());
            }
        }
    }

    pub fn write_int(&mut self, value: i64) {
        if value >= 0 {
            return self.write_uint(value as u64);
        }

        match value {
            -32..=-1 => self.buffer.put_u8(value as u8),
            -0x80..=-33 => {
                self.buffer.put_slice(&[INT8.0, value as u8]);
            }
            -0x8000..=-0x81 => {
                self.buffer.put_u8(INT16.0);
                self.buffer.put_slice(&(value as i16).to_be_bytes());
            }
            -0x8000_0000..=-0x8001 => {
                self.buffer.put_u8(INT32.0);
                self.buffer.put_slice(&(value as i32).to_be_bytes());
            }
            _ => {
                self.buffer.put_u8(INT64.0);
                self.buffer.put_slice(&value.to_be_bytes());
            }
        }
    }

    pub fn write_f32(&mut self, value: f32) {
        self.buffer.put_u8(FLOAT32.0);
        self.buffer.put_slice(&value.to_be_bytes());
    }

    pub fn write_f64(&mut self, value: f64) {
        self.buffer.put_u8(FLOAT64.0);
        self.buffer.put_slice(&value.to_be_bytes());
    }

    pub fn write_string_header(&mut self, len: u32) {
        match len {
            0..=31 => self.buffer.put_u8(0xa0 | len as u8),
            32..=0xff => {
                self.buffer.put_slice(&[STR8.0, len as u8]);
            }
            0x100..=0xffff => {
                self.buffer.put_u8(STR16.0);
                self.buffer.put_slice(&(len as u16).to_be_bytes());
            }
            _ => {
                self.buffer.put_u8(STR32.0);
                self.buffer.put_slice(&len.to_be_bytes());
            }
        }
    }

    pub fn write_str(&mut self, value: &str) {
        self.write_string_header(value.len() as u32);
        self.buffer.put_slice(value.as_bytes());
    }

    pub fn write_bin_header(&mut self, len: u32) {
        match len {
            0..=0xff => {
                self.buffer.put_slice(&[BIN8.0, len as u8]);
            }
            0x100..=0xffff => {
                self.buffer.put_u8(BIN16.0);
                self.buffer.put_slice(&(len as u16).to_be_bytes());
            }
            _ => {
                self.buffer.put_u8(BIN32.0);
                self.buffer.put_slice(&len.to_be_bytes());
            }
        }
    }

    pub fn write_bin(&mut self, value: &[u8]) {
        self.write_bin_header(value.len() as u32);
        self.buffer.put_slice(value);
    }

    pub fn write_ext(&mut self, type_code: i8, data: &[u8]) {
        match data.len() {
            1 => self.buffer.put_u8(FIXEXT1.0),
            2 => self.buffer.put_u8(FIXEXT2.0),
            4 => self.buffer.put_u8(FIXEXT4.0),
            8 => self.buffer.put_u8(FIXEXT8.0),
            16 => self.buffer.put_u8(FIXEXT16.0),
            len @ 0..=0xff => {
                self.buffer.put_slice(&[EXT8.0, len as u8]);
            }
            len @ 0x100..=0xffff => {
                self.buffer.put_u8(EXT16.0);
                self.buffer.put_slice(&(len as u16).to_be_bytes());
            }
            len => {
                self.buffer.put_u8(EXT32.0);
                self.buffer.put_slice(&(len as u32).to_be_bytes());
            }
        }
        self.buffer.put_u8(type_code as u8);
        self.buffer.put_slice(data);
    }

    pub fn write_array_header(&mut self, len: u32) {
        match len {
            0..=15 => self.buffer.put_u8(0x90 | len as u8),
            16..=0xffff => {
                self.buffer.put_u8(ARRAY16.0);
                self.buffer.put_slice(&(len as u16).to_be_bytes());
            }
            _ => {
                self.buffer.put_u8(ARRAY32.0);
                self.buffer.put_slice(&len.to_be_bytes());
            }
        }
    }

    pub fn write_map_header(&mut self, len: u32) {
        match len {
            0..=15 => self.buffer.put_u8(0x80 | len as u8),
            16..=0xffff => {
                self.buffer.put_u8(MAP16.0);
                self.buffer.put_slice(&(len as u16).to_be_bytes());
            }
            _ => {
                self.buffer.put_u8(MAP32.0);
                self.buffer.put_slice(&len.to_be_bytes());
            }
        }
    }

    /// Appends pre-encoded MessagePack bytes verbatim (e.g. a property-name
    /// blob computed at converter construction).
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buffer.put_slice(bytes);
    }
}
