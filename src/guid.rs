use std::fmt::{self, Debug, Display};

use crate::err::Result;
use crate::utils::bytes;

/// A Windows GUID as stored on disk: the first three fields little-endian,
/// the trailing eight bytes in order.
#[derive(PartialEq, Eq, PartialOrd, Clone, Copy, Hash)]
pub struct Guid {
    data1: u32,
    data2: u16,
    data3: u16,
    data4: [u8; 8],
}

impl Guid {
    pub fn new(data1: u32, data2: u16, data3: u16, data4: [u8; 8]) -> Guid {
        Guid {
            data1,
            data2,
            data3,
            data4,
        }
    }

    /// Read 16 GUID bytes at `offset`.
    pub(crate) fn from_buf(buf: &[u8], offset: usize) -> Result<Guid> {
        let data1 = bytes::read_u32_le_r(buf, offset, "guid")?;
        let data2 = bytes::read_u16_le_r(buf, offset + 4, "guid")?;
        let data3 = bytes::read_u16_le_r(buf, offset + 6, "guid")?;
        let data4 = bytes::read_array_r::<8>(buf, offset + 8, "guid")?;
        Ok(Guid::new(data1, data2, data3, data4))
    }
}

/// `{xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx}`, lowercase, braced, the form
/// the Windows Event Viewer shows.
impl Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}}}",
            self.data1,
            self.data2,
            self.data3,
            self.data4[0],
            self.data4[1],
            self.data4[2],
            self.data4[3],
            self.data4[4],
            self.data4[5],
            self.data4[6],
            self.data4[7]
        )
    }
}

impl Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}
