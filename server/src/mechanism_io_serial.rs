// Digital I/O backend: an ASCII-line command protocol over a serial
// port. Grounded on mkd_pio.cpp's `pio_command`/`pio_set_output`/
// `pio_get_output`/`pio_get_input`: commands are `\r`-terminated
// strings of the form `@00D000` (configure port direction) or
// `@00P0<hex>` (write output byte) / `@00P0?` (query output byte) /
// `@00P1?` (query input byte); replies are `\r`-terminated and, when a
// reply is expected, compared against the exact string the original
// checks for (`!00`) — any mismatch is a hardware error.

use std::io::{BufRead, BufReader, Write};
use std::time::Duration;

use async_trait::async_trait;
use serialport::SerialPort;
use tokio::sync::Mutex;

use mookodi_elements::error::hardware_error;
use mookodi_elements::mechanism_trait::DigitalIoBackend;
use canonical_error::CanonicalError;

const SET_PORT0_OUTPUT: &str = "@00D000";
const SET_PORT1_INPUT: &str = "@00D1FF";
const ACK: &str = "!00";

pub struct SerialDigitalIo {
    port: Mutex<BufReader<Box<dyn SerialPort>>>,
}

impl SerialDigitalIo {
    pub fn open(device: &str, baud_rate: u32) -> Result<Self, CanonicalError> {
        let port = serialport::new(device, baud_rate)
            .timeout(Duration::from_millis(500))
            .open()
            .map_err(|e| hardware_error(&format!("opening {}", device), &e.to_string()))?;
        Ok(SerialDigitalIo { port: Mutex::new(BufReader::new(port)) })
    }

    async fn command(&self, cmd: &str, expect: Option<&str>) -> Result<String, CanonicalError> {
        let mut port = self.port.lock().await;
        let mut line = cmd.to_string();
        line.push('\r');
        port.get_mut().write_all(line.as_bytes())
            .map_err(|e| hardware_error(&format!("writing {}", cmd), &e.to_string()))?;

        let mut reply = String::new();
        port.read_line(&mut reply)
            .map_err(|e| hardware_error(&format!("reading reply to {}", cmd), &e.to_string()))?;
        let reply = reply.trim_end_matches(['\r', '\n']).to_string();

        if let Some(expect) = expect {
            if reply != expect {
                return Err(hardware_error(
                    &format!("unexpected reply to {}", cmd),
                    &format!("got {:?}, expected {:?}", reply, expect)));
            }
        }
        Ok(reply)
    }
}

#[async_trait]
impl DigitalIoBackend for SerialDigitalIo {
    async fn set_output_mask(&self, mask: u8) -> Result<(), CanonicalError> {
        self.command(SET_PORT0_OUTPUT, Some(ACK)).await?;
        self.command(&format!("@00P0{:02X}", mask), Some(ACK)).await?;
        Ok(())
    }

    async fn get_output_mask(&self) -> Result<u8, CanonicalError> {
        self.command(SET_PORT0_OUTPUT, Some(ACK)).await?;
        let reply = self.command("@00P0?", None).await?;
        parse_hex_byte(&reply)
    }

    async fn get_input_mask(&self) -> Result<u8, CanonicalError> {
        self.command(SET_PORT1_INPUT, Some(ACK)).await?;
        let reply = self.command("@00P1?", None).await?;
        parse_hex_byte(&reply)
    }
}

fn parse_hex_byte(reply: &str) -> Result<u8, CanonicalError> {
    // Replies to a query look like "@00P0<hex>": the byte follows the
    // four-character echo of the command's address/port prefix.
    let hex = reply.get(4..).ok_or_else(|| hardware_error(
        "parsing PIO reply", &format!("reply too short: {:?}", reply)))?;
    u8::from_str_radix(hex, 16)
        .map_err(|e| hardware_error(&format!("parsing PIO reply {:?}", reply), &e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hex_byte_reads_trailing_hex() {
        assert_eq!(parse_hex_byte("@00P0FF").unwrap(), 0xFF);
        assert_eq!(parse_hex_byte("@00P1 0A").unwrap_err().message.contains("parsing"), true);
    }

    #[test]
    fn parse_hex_byte_rejects_short_reply() {
        assert!(parse_hex_byte("@00").is_err());
    }
}
