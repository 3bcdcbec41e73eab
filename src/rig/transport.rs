//! transport.rs
//! Serial link to the rig microcontroller.
//!
//! - Discovery: first port whose USB description contains the configured filter.
//! - Strict alternation: one request → one 16-byte frame → one 5-byte actuator reply.
//! - Any I/O failure or timeout closes the link; sequencing mistakes do not.

use log::{debug, info, warn};
use serialport::{ClearBuffer, SerialPort, SerialPortInfo, SerialPortType};
use std::{
    io::{self, Read, Write},
    thread,
};

use crate::config::LinkSettings;
use crate::errors::{ConnectError, LinkError, ProtocolSequenceError, TransportError};
use crate::rig::actuator::ActuatorState;
use crate::rig::frame::{RawFrame, RAW_FRAME_LEN, REQUEST_BYTE};

/// Byte stream to the firmware. Implemented by the serial port and the simulated rig.
pub trait RigLink: Read + Write + Send {
    fn name(&self) -> &str;

    /// Drop whatever is still buffered on the input side.
    fn discard_input(&mut self) -> io::Result<()>;
}

pub struct SerialLink {
    port: Box<dyn SerialPort>,
    name: String,
}

impl Read for SerialLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl RigLink for SerialLink {
    fn name(&self) -> &str {
        &self.name
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.port.clear(ClearBuffer::Input).map_err(io::Error::from)
    }
}

fn port_description(info: &SerialPortInfo) -> String {
    match &info.port_type {
        SerialPortType::UsbPort(usb) => [usb.product.as_deref(), usb.manufacturer.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" "),
        _ => String::new(),
    }
}

/// Find the rig, open it and wait for the board to come out of reset.
pub fn connect(settings: &LinkSettings) -> Result<LinkHandle, ConnectError> {
    let ports = serialport::available_ports().map_err(ConnectError::Enumerate)?;
    let port_name = ports
        .iter()
        .find(|p| port_description(p).contains(&settings.description_filter))
        .map(|p| p.port_name.clone())
        .ok_or_else(|| ConnectError::NoMatchingDevice {
            filter: settings.description_filter.clone(),
        })?;

    let port = serialport::new(&port_name, settings.baud_rate)
        .timeout(settings.timeout())
        .open()
        .map_err(|source| ConnectError::Open { port: port_name.clone(), source })?;
    port.clear(ClearBuffer::All).map_err(|e| ConnectError::Flush {
        port: port_name.clone(),
        source: e.into(),
    })?;

    info!("[Link] opened {} @ {} baud, settling {:?}", port_name, settings.baud_rate, settings.settle());
    thread::sleep(settings.settle());

    Ok(LinkHandle::new(Box::new(SerialLink { port, name: port_name })))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingRequest,
    FrameReceived,
}

/// Exclusively owned link plus the request/response sequencing state.
/// Dropping the handle releases the port.
pub struct LinkHandle {
    link: Option<Box<dyn RigLink>>,
    name: String,
    phase: Phase,
}

impl LinkHandle {
    pub fn new(link: Box<dyn RigLink>) -> Self {
        let name = link.name().to_string();
        Self { link: Some(link), name, phase: Phase::AwaitingRequest }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_open(&self) -> bool {
        self.link.is_some()
    }

    /// Send the request byte and read one frame.
    pub fn request_frame(&mut self) -> Result<RawFrame, TransportError> {
        if self.phase == Phase::FrameReceived {
            return Err(ProtocolSequenceError::FrameNotConsumed.into());
        }
        let result = match self.link.as_mut() {
            Some(link) => exchange_frame(link.as_mut()),
            None => return Err(LinkError::Closed.into()),
        };
        match result {
            Ok(frame) => {
                self.phase = Phase::FrameReceived;
                Ok(frame)
            }
            Err(e) => {
                warn!("[Link] {} lost while receiving: {}", self.name, e);
                self.close();
                Err(e.into())
            }
        }
    }

    /// Reply to the frame just read with the current actuator state.
    pub fn send_actuators(&mut self, actuators: &ActuatorState) -> Result<(), TransportError> {
        if self.phase != Phase::FrameReceived {
            return Err(ProtocolSequenceError::NoFrameRead.into());
        }
        let bytes = actuators.to_frame().encode();
        let result = match self.link.as_mut() {
            Some(link) => link.write_all(&bytes).and_then(|_| link.flush()).map_err(LinkError::from),
            None => return Err(LinkError::Closed.into()),
        };
        match result {
            Ok(()) => {
                self.phase = Phase::AwaitingRequest;
                Ok(())
            }
            Err(e) => {
                warn!("[Link] {} lost while transmitting: {}", self.name, e);
                self.close();
                Err(e.into())
            }
        }
    }

    pub fn close(&mut self) {
        if self.link.take().is_some() {
            info!("[Link] {} closed", self.name);
        }
        self.phase = Phase::AwaitingRequest;
    }
}

impl Drop for LinkHandle {
    fn drop(&mut self) {
        self.close();
    }
}

fn exchange_frame(link: &mut dyn RigLink) -> Result<RawFrame, LinkError> {
    link.write_all(&[REQUEST_BYTE])?;
    link.flush()?;
    let mut buf = [0u8; RAW_FRAME_LEN];
    read_full(link, &mut buf)?;
    link.discard_input()?;
    Ok(RawFrame::decode(&buf))
}

fn read_full(link: &mut dyn RigLink, buf: &mut [u8]) -> Result<(), LinkError> {
    let mut filled = 0;
    while filled < buf.len() {
        match link.read(&mut buf[filled..]) {
            Ok(0) => {
                debug!("[Link] frame ended after {} bytes", filled);
                return Err(LinkError::ShortFrame { expected: buf.len() });
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
