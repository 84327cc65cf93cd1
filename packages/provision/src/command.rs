use embedded_io_async::Read;
use heapless::Vec;
use log::info;

/// Literal that unlocks a device whose fingerprint record does not match.
pub const UNLOCK_TOKEN: &str = "Get_Chip_To_Unlock";

pub const COMMAND_LINE_MAX: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Unlock,
    Other,
}

impl Command {
    pub fn from_line(line: &[u8]) -> Self {
        if line.trim_ascii() == UNLOCK_TOKEN.as_bytes() {
            Self::Unlock
        } else {
            Self::Other
        }
    }
}

/// Line oriented source of operator commands.
#[allow(async_fn_in_trait)]
pub trait CommandChannel {
    type Error: core::fmt::Debug;

    /// Waits without timeout for the next complete line.
    async fn next_command(&mut self) -> Result<Command, Self::Error>;

    /// True once the channel can never yield another command.
    fn is_closed(&self) -> bool {
        false
    }
}

/// Turns console bytes into commands, one per line.
///
/// `\r`, `\n` and `\r\n` each end exactly one line, and an empty line is a command
/// like any other. A line that outgrows [`COMMAND_LINE_MAX`] is reported once, as
/// soon as it overflows, and the rest of it is discarded.
pub struct CommandFramer {
    line: Vec<u8, COMMAND_LINE_MAX>,
    discarding: bool,
    after_cr: bool,
}

impl CommandFramer {
    pub const fn new() -> Self {
        Self {
            line: Vec::new(),
            discarding: false,
            after_cr: false,
        }
    }

    pub fn push(&mut self, byte: u8) -> Option<Command> {
        let after_cr = core::mem::replace(&mut self.after_cr, byte == b'\r');
        match byte {
            b'\n' if after_cr => None,
            b'\r' | b'\n' => {
                if core::mem::take(&mut self.discarding) {
                    return None;
                }
                let text = core::str::from_utf8(self.line.trim_ascii()).unwrap_or("<non-utf8>");
                info!("command: received {:?}", text);
                let command = Command::from_line(&self.line);
                self.line.clear();
                Some(command)
            }
            _ if self.discarding => None,
            _ => match self.line.push(byte) {
                Ok(()) => None,
                Err(_) => {
                    info!("command: line overflow");
                    self.line.clear();
                    self.discarding = true;
                    Some(Command::Other)
                }
            },
        }
    }
}

impl Default for CommandFramer {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SerialError<E> {
    Read(E),
    /// The reader reported end of input; no further command can arrive.
    Closed,
}

/// Command channel over any async byte reader, typically the console UART.
pub struct SerialCommands<R> {
    reader: R,
    framer: CommandFramer,
    rx: [u8; 16],
    rx_pos: usize,
    rx_len: usize,
    closed: bool,
}

impl<R: Read> SerialCommands<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            framer: CommandFramer::new(),
            rx: [0; 16],
            rx_pos: 0,
            rx_len: 0,
            closed: false,
        }
    }
}

impl<R: Read> CommandChannel for SerialCommands<R> {
    type Error = SerialError<R::Error>;

    async fn next_command(&mut self) -> Result<Command, Self::Error> {
        loop {
            // Bytes after a completed line stay buffered for the next call.
            while self.rx_pos < self.rx_len {
                let byte = self.rx[self.rx_pos];
                self.rx_pos += 1;
                if let Some(command) = self.framer.push(byte) {
                    return Ok(command);
                }
            }
            if self.closed {
                return Err(SerialError::Closed);
            }
            let n = self.reader.read(&mut self.rx).await.map_err(SerialError::Read)?;
            if n == 0 {
                self.closed = true;
                return Err(SerialError::Closed);
            }
            self.rx_pos = 0;
            self.rx_len = n;
        }
    }

    fn is_closed(&self) -> bool {
        self.closed && self.rx_pos == self.rx_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;

    #[test]
    fn token_matches_after_trimming() {
        assert_eq!(Command::from_line(b"Get_Chip_To_Unlock"), Command::Unlock);
        assert_eq!(Command::from_line(b"  Get_Chip_To_Unlock \t"), Command::Unlock);
    }

    #[test]
    fn token_is_case_sensitive() {
        assert_eq!(Command::from_line(b"get_chip_to_unlock"), Command::Other);
        assert_eq!(Command::from_line(b"Get_Chip_To_Unlock!"), Command::Other);
        assert_eq!(Command::from_line(b"hello"), Command::Other);
    }

    fn feed(framer: &mut CommandFramer, bytes: &[u8]) -> std::vec::Vec<Command> {
        bytes.iter().filter_map(|byte| framer.push(*byte)).collect()
    }

    #[test]
    fn bare_enter_is_a_non_matching_command() {
        let mut framer = CommandFramer::new();
        assert_eq!(feed(&mut framer, b"\n"), [Command::Other]);
        assert_eq!(feed(&mut framer, b"\r"), [Command::Other]);
        assert_eq!(feed(&mut framer, b"\r\n"), [Command::Other]);
    }

    #[test]
    fn crlf_ends_one_line_even_across_reads() {
        let mut framer = CommandFramer::new();
        assert_eq!(feed(&mut framer, b"Get_Chip_To_Unlock\r"), [Command::Unlock]);
        assert_eq!(feed(&mut framer, b"\nnope\r\n"), [Command::Other]);
        assert_eq!(feed(&mut framer, b"\n\n"), [Command::Other, Command::Other]);
    }

    #[test]
    fn oversized_line_is_rejected_once_then_framing_resumes() {
        let mut framer = CommandFramer::new();
        let mut long = std::vec![b'x'; COMMAND_LINE_MAX + 10];
        long.extend_from_slice(b"\r\nGet_Chip_To_Unlock\n");
        assert_eq!(feed(&mut framer, &long), [Command::Other, Command::Unlock]);
    }

    #[test]
    fn token_at_the_line_limit_still_unlocks() {
        let mut framer = CommandFramer::new();
        let mut line = std::vec![b' '; COMMAND_LINE_MAX - UNLOCK_TOKEN.len()];
        line.extend_from_slice(UNLOCK_TOKEN.as_bytes());
        line.push(b'\n');
        assert_eq!(feed(&mut framer, &line), [Command::Unlock]);
    }

    #[test]
    fn serial_channel_reports_empty_line_before_token() {
        let input: &[u8] = b"\nGet_Chip_To_Unlock\n";
        let mut channel = SerialCommands::new(input);
        assert_eq!(block_on(channel.next_command()), Ok(Command::Other));
        assert_eq!(block_on(channel.next_command()), Ok(Command::Unlock));
    }

    #[test]
    fn serial_channel_reports_end_of_input() {
        let input: &[u8] = b"Get_Chip";
        let mut channel = SerialCommands::new(input);
        assert!(!channel.is_closed());
        assert_eq!(block_on(channel.next_command()), Err(SerialError::Closed));
        assert!(channel.is_closed());
        assert_eq!(block_on(channel.next_command()), Err(SerialError::Closed));
    }

    #[test]
    fn serial_channel_reports_other_input() {
        let input: &[u8] = b"reboot please\n";
        let mut channel = SerialCommands::new(input);
        assert_eq!(block_on(channel.next_command()), Ok(Command::Other));
    }

    #[test]
    fn serial_channel_keeps_bytes_after_a_line() {
        let input: &[u8] = b"hi\nGet_Chip_To_Unlock\n";
        let mut channel = SerialCommands::new(input);
        assert_eq!(block_on(channel.next_command()), Ok(Command::Other));
        assert_eq!(block_on(channel.next_command()), Ok(Command::Unlock));
    }

    #[test]
    fn serial_channel_treats_overflow_as_other() {
        let mut input = std::vec![b'x'; COMMAND_LINE_MAX + 1];
        input.push(b'\n');
        let mut channel = SerialCommands::new(input.as_slice());
        assert_eq!(block_on(channel.next_command()), Ok(Command::Other));
    }
}
