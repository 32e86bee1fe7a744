use std::fmt::{self, Debug, Display, Write as _};

use crate::err::{EvtxError, Result};
use crate::utils::bytes;

/// A Windows security identifier.
///
/// Layout: revision byte, sub-authority count, 48-bit authority in
/// big-endian order, then the sub-authorities as little-endian u32s.
#[derive(PartialEq, Eq, PartialOrd, Clone)]
pub struct Sid {
    revision: u8,
    authority: u64,
    sub_authorities: Vec<u32>,
}

impl Sid {
    pub(crate) fn from_buf(buf: &[u8], offset: usize, size: usize) -> Result<Sid> {
        let data = bytes::slice_r(buf, offset, size, "sid")?;
        if data.len() < 8 {
            return Err(EvtxError::Truncated {
                what: "sid",
                offset: offset as u64,
                need: 8,
                have: data.len(),
            });
        }

        let revision = data[0];
        let sub_count = data[1] as usize;

        // The identifier authority is kept in big-endian order.
        let mut authority = 0_u64;
        for &b in &data[2..8] {
            authority = (authority << 8) | u64::from(b);
        }

        let need = 8 + sub_count * 4;
        if data.len() < need {
            return Err(EvtxError::Truncated {
                what: "sid sub-authorities",
                offset: offset as u64,
                need,
                have: data.len(),
            });
        }

        let mut sub_authorities = Vec::with_capacity(sub_count);
        for i in 0..sub_count {
            let at = 8 + i * 4;
            sub_authorities.push(u32::from_le_bytes(
                data[at..at + 4].try_into().expect("bounds checked above"),
            ));
        }

        Ok(Sid {
            revision,
            authority,
            sub_authorities,
        })
    }
}

/// `S-R-A(-S)*` notation.
impl Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}-{}", self.revision, self.authority)?;
        for sub in &self.sub_authorities {
            write!(f, "-{sub}")?;
        }
        Ok(())
    }
}

impl Debug for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = String::new();
        let _ = write!(s, "{self}");
        f.write_str(&s)
    }
}
