use embedded_io_async::{ErrorKind, ErrorType, Read};
use esp_hal::uart::RxError;

use super::types::SerialUart;

#[derive(Debug)]
pub(crate) struct SerialReadError(RxError);

impl embedded_io_async::Error for SerialReadError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// Async byte source over the console UART, feeding the command channel.
pub(crate) struct ConsoleReader {
    uart: SerialUart,
}

impl ConsoleReader {
    pub(crate) fn new(uart: SerialUart) -> Self {
        Self { uart }
    }
}

impl ErrorType for ConsoleReader {
    type Error = SerialReadError;
}

impl Read for ConsoleReader {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.uart.read_async(buf).await.map_err(SerialReadError)
    }
}
