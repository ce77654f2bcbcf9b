//! UART transport using the `serialport` crate.
//!
//! The EFM8 UART bootloader accepts the same records as the HID one, framed
//! 8N1 at a rate it detects from the `$` start byte. A serial port carries no
//! USB product id, so the device family is chosen by the caller through
//! [`SerialConfig::product_id`].

use {
    crate::{
        error::{Error, Result},
        transport::{Transport, TransportKind},
    },
    log::{debug, trace},
    serialport::ClearBuffer,
    std::{
        io::{self, Read, Write},
        time::Duration,
    },
};

/// Packet size used when slicing records for the serial line.
pub const UART_PACKET_SIZE: usize = 64;

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout.
    pub timeout: Duration,
    /// Catalog product id of the device family behind this port.
    pub product_id: u16,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 115200,
            timeout: Duration::from_millis(1000),
            product_id: 0,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name, baud rate and family product id.
    pub fn new(port_name: impl Into<String>, baud_rate: u32, product_id: u16) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            product_id,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Transport over a serial port.
pub struct UartTransport {
    config: SerialConfig,
    port: Option<Box<dyn serialport::SerialPort>>,
}

impl UartTransport {
    /// Create a transport. The port is opened by [`Transport::open`].
    pub fn new(config: SerialConfig) -> Self {
        Self { config, port: None }
    }

    /// Get the configuration.
    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    fn port(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "port closed").into())
    }
}

impl Transport for UartTransport {
    fn open(&mut self) -> Result<()> {
        if self
            .port
            .is_some()
        {
            return Ok(());
        }

        let port = serialport::new(&self.config.port_name, self.config.baud_rate)
            .timeout(self.config.timeout)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .open()?;
        port.clear(ClearBuffer::All)?;
        debug!(
            "Opened {} at {} baud",
            self.config.port_name, self.config.baud_rate
        );

        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        // Take ownership of the port and let it drop (close)
        self.port
            .take();
        Ok(())
    }

    fn send(&mut self, packet: &[u8]) -> Result<()> {
        trace!("UART out: {packet:02X?}");
        let port = self.port()?;
        port.write_all(packet)?;
        port.flush()?;
        Ok(())
    }

    fn recv(&mut self, len: usize) -> Result<Vec<u8>> {
        let timeout = self
            .config
            .timeout;
        let port = self.port()?;
        let mut buf = vec![0u8; len];
        let mut filled = 0;

        while filled < len {
            match port.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    if filled == 0 {
                        return Err(Error::Timeout(format!(
                            "no response within {}ms",
                            timeout.as_millis()
                        )));
                    }
                    break;
                },
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                Err(e) => return Err(e.into()),
            }
        }

        buf.truncate(filled);
        trace!("UART in: {buf:02X?}");
        Ok(buf)
    }

    fn max_packet_size(&self) -> usize {
        UART_PACKET_SIZE
    }

    fn product_id(&self) -> u16 {
        self.config
            .product_id
    }

    fn name(&self) -> &str {
        &self
            .config
            .port_name
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Uart
    }
}
