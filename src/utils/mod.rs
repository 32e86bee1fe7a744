pub(crate) mod bytes;
pub(crate) mod cursor;
pub(crate) mod escape;
pub(crate) mod time;
pub(crate) mod utf16;
