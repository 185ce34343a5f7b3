use crate::byteutils::u32_from_le_bytes;
use crate::error::LsmLiteError;
use crate::Result;
use std::io::{Read, Seek, SeekFrom, Write};

pub(crate) const FOOTER_MAGIC_NUMBER: u32 = 0xdb5a_11fe;
pub(crate) const FOOTER_BYTE_SIZE: i64 = 12;

pub(crate) struct Footer {
    pub meta_offset: u32,
    pub meta_length: u32,
}

impl Footer {
    pub(crate) fn new(meta_offset: u32, meta_length: u32) -> Footer {
        Footer {
            meta_offset,
            meta_length,
        }
    }

    pub(crate) fn write_to_file(&self, writer: &mut impl Write) -> Result<()> {
        writer.write_all(&self.meta_offset.to_le_bytes())?;
        writer.write_all(&self.meta_length.to_le_bytes())?;
        writer.write_all(&FOOTER_MAGIC_NUMBER.to_le_bytes())?;
        Ok(())
    }

    pub(crate) fn load(reader: &mut (impl Read + Seek)) -> Result<Footer> {
        reader.seek(SeekFrom::End(-FOOTER_BYTE_SIZE))?;

        let mut buf = [0u8; FOOTER_BYTE_SIZE as usize];
        reader.read_exact(&mut buf)?;

        let magic = u32_from_le_bytes(&buf[8..12]);
        if magic != FOOTER_MAGIC_NUMBER {
            return Err(LsmLiteError::CorruptSst("invalid footer magic number".into()));
        }

        Ok(Footer {
            meta_offset: u32_from_le_bytes(&buf[0..4]),
            meta_length: u32_from_le_bytes(&buf[4..8]),
        })
    }
}
