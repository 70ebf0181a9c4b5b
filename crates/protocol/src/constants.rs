use std::time::Duration;

/// Byte that terminates every frame on the wire.
pub const DELIMITER: u8 = b'~';

/// Signal tag appended by a client when it identifies itself.
pub const CONNECT_TAG: &str = "CONNECT";

/// Signal tag appended by a client to a chat line.
pub const MESSAGE_TAG: &str = "MESSAGE";

/// Signal tag for a client leaving (farewell and server acknowledgment).
pub const CLIENT_DISCONNECT_TAG: &str = "DISCONNECTED_CLIENT";

/// Signal tag for the server-wide shutdown notice.
pub const SERVER_DISCONNECT_TAG: &str = "DISCONNECTED_SERVER";

/// Default TCP port for the relay.
pub const DEFAULT_PORT: u16 = 9000;

/// Default size of the per-connection read buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Largest accumulation the codec accepts without seeing a delimiter (64 KiB).
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Timeout for a client's transport connect.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Time allowed for a single frame write before the peer is considered stuck.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on flushing queued frames while closing a connection.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(3);

/// Prefix of every server-originated notice.
pub const SERVER_PREFIX: &str = "[SERVER]";

/// Prefix of every client-local transcript notice.
pub const CLIENT_PREFIX: &str = "[CLIENT]";

/// Payload of the server-wide shutdown frame.
pub const SERVER_CLOSED_NOTICE: &str = "[SERVER]: Server is closed!";

/// Join notice relayed to everyone when `name` identifies itself.
pub fn join_notice(name: &str) -> String {
    format!("{SERVER_PREFIX}: {name} connected!")
}

/// Chat line as composed by a client.
pub fn chat_line(name: &str, text: &str) -> String {
    format!("{name}: {text}")
}

/// Farewell a client sends with its disconnect frame.
pub fn farewell(name: &str) -> String {
    format!("{name}: is disconnected!")
}

/// Departure notice used when a client vanished without saying goodbye.
pub fn lost_notice(name: &str) -> String {
    format!("{SERVER_PREFIX}: {name} lost connection!")
}
