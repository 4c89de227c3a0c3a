use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Command byte of a client packet. Unknown bytes are kept raw by callers;
/// the driver only branches on the listed ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum MySqlCommand {
    ComSleep = 0x00,
    ComQuit = 0x01,
    ComInitDb = 0x02,
    ComQuery = 0x03,
    ComFieldList = 0x04,
    ComCreateDb = 0x05,
    ComDropDb = 0x06,
    ComRefresh = 0x07,
    ComShutdown = 0x08,
    ComStatistics = 0x09,
    ComProcessInfo = 0x0a,
    ComConnect = 0x0b,
    ComProcessKill = 0x0c,
    ComDebug = 0x0d,
    ComPing = 0x0e,
    ComChangeUser = 0x11,
    ComSetOption = 0x1b,
    ComStmtPrepare = 0x16,
    ComStmtExecute = 0x17,
    ComStmtSendLongData = 0x18,
    ComStmtClose = 0x19,
    ComStmtReset = 0x1a,
    ComStmtFetch = 0x1c,
    ComResetConnection = 0x1f,
}

impl MySqlCommand {
    /// Commands the server never replies to.
    pub fn expects_no_reply(&self) -> bool {
        matches!(
            self,
            MySqlCommand::ComQuit | MySqlCommand::ComStmtSendLongData | MySqlCommand::ComStmtClose
        )
    }
}
