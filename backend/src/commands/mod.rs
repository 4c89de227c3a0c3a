pub mod change_user_command;
pub mod handshake_response_command;
pub mod ssl_request_command;
