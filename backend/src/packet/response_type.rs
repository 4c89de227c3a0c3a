#[non_exhaustive]
pub struct ResponseType;

impl ResponseType {
    pub const OK: u8 = 0x00;
    pub const LOCAL_INFILE: u8 = 0xFB;
    /// EOF when the payload is shorter than 9 bytes, AuthSwitchRequest
    /// otherwise.
    pub const END_OF_FILE: u8 = 0xFE;
    pub const AUTH_PLUGIN_SWITCH: u8 = 0xFE;
    pub const ERROR: u8 = 0xFF;
}
