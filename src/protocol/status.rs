use std::fmt;

/// Status is the one byte outcome code carried by every response.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum Status {
    None = 0,
    Ok = 1,
    Error = 2,
    KeyNotFound = 3,
}

impl Status {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

// Unknown bytes are never produced by a server, but a reader must not fail on them.
impl From<u8> for Status {
    fn from(byte: u8) -> Self {
        match byte {
            1 => Status::Ok,
            2 => Status::Error,
            3 => Status::KeyNotFound,
            _ => Status::None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Ok => "OK",
            Status::Error => "ERR",
            Status::KeyNotFound => "KEYNOTFOUND",
            Status::None => "NONE",
        };
        f.write_str(name)
    }
}
