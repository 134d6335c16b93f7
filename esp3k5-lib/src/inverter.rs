use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use log::debug;
use serialport::SerialPort;

use crate::protocol::{
    self,
    frame::{FrameAssembler, FrameStats},
    telemetry::{self, Telemetry},
    POLL_LEN,
};

/// Receives one record per validated frame.
pub trait TelemetrySink {
    fn publish(&mut self, telemetry: &Telemetry);
}

impl<F: FnMut(&Telemetry)> TelemetrySink for F {
    fn publish(&mut self, telemetry: &Telemetry) {
        self(telemetry)
    }
}

/// Poll-cycle driver for one inverter on one serial link.
pub struct Esp3k5<'a> {
    port: &'a mut dyn SerialPort,
    assembler: FrameAssembler,
    station_id: u8,
}

impl<'a> Esp3k5<'a> {
    pub fn new(port: &'a mut dyn SerialPort, station_id: u8) -> Self {
        Self {
            port,
            assembler: FrameAssembler::new(),
            station_id,
        }
    }

    pub fn stats(&self) -> FrameStats {
        self.assembler.stats()
    }

    /// Send one poll command. Fire and forget: the response, if any, is
    /// picked up by a later `drain`.
    pub fn send_poll(&mut self) -> Result<()> {
        let mut buffer = [0u8; POLL_LEN];
        let len = protocol::encode_poll(&mut buffer, self.station_id);

        debug!("send {:02X?}", &buffer[..len]);
        self.port.write_all(&buffer[..len])?;
        self.port.flush()?;
        Ok(())
    }

    /// Read whatever the port has buffered without blocking, feeding the
    /// assembler and publishing one record per validated frame. Returns
    /// the number of records published.
    pub fn drain(&mut self, sink: &mut dyn TelemetrySink) -> Result<usize> {
        let mut published = 0;
        let mut byte = [0u8; 1];

        while self.port.bytes_to_read()? > 0 {
            self.port.read_exact(&mut byte)?;

            if let Some(frame) = self.assembler.push(byte[0]) {
                let record = telemetry::decode(&frame);
                sink.publish(&record);
                published += 1;
            }
        }
        Ok(published)
    }

    /// One complete cycle for interactive use: poll, then wait for the
    /// first record until `timeout` expires. A quiet link is not an error
    /// here; the next cycle resynchronizes on its own.
    pub fn poll_once(&mut self, timeout: Duration) -> Result<Option<Telemetry>> {
        self.send_poll()?;

        let deadline = Instant::now() + timeout;
        let mut latest: Option<Telemetry> = None;

        while latest.is_none() && Instant::now() < deadline {
            let mut sink = |record: &Telemetry| latest = Some(record.clone());
            self.drain(&mut sink)?;

            if latest.is_none() {
                thread::sleep(Duration::from_millis(5));
            }
        }
        Ok(latest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DEFAULT_STATION_ID;

    use std::collections::VecDeque;
    use std::io;

    use serialport::{ClearBuffer, DataBits, FlowControl, Parity, StopBits};

    const FRAME: [u8; 32] = [
        0xB1, 0xB7, 0x01, 0x15, 0x0E, 0x05, 0x01, 0x01, 0x0E, 0x9A, 0x08, 0xC8, 0x01, 0x60, 0x01,
        0xFF, 0x00, 0x9F, 0x86, 0x01, 0x00, 0x00, 0x00, 0x00, 0x01, 0x59, 0x02, 0x01, 0x01, 0x63,
        0x6E, 0x9D,
    ];

    #[derive(Default)]
    struct MockPort {
        rx: VecDeque<u8>,
        tx: Vec<u8>,
    }

    impl MockPort {
        fn with_rx(bytes: &[u8]) -> Self {
            MockPort {
                rx: bytes.iter().copied().collect(),
                tx: Vec::new(),
            }
        }
    }

    impl io::Read for MockPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.rx.is_empty() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "rx empty"));
            }
            let n = buf.len().min(self.rx.len());
            for slot in &mut buf[..n] {
                *slot = self.rx.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    impl io::Write for MockPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.tx.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SerialPort for MockPort {
        fn name(&self) -> Option<String> {
            Some("mock".to_string())
        }

        fn baud_rate(&self) -> serialport::Result<u32> {
            Ok(9600)
        }

        fn data_bits(&self) -> serialport::Result<DataBits> {
            Ok(DataBits::Eight)
        }

        fn flow_control(&self) -> serialport::Result<FlowControl> {
            Ok(FlowControl::None)
        }

        fn parity(&self) -> serialport::Result<Parity> {
            Ok(Parity::None)
        }

        fn stop_bits(&self) -> serialport::Result<StopBits> {
            Ok(StopBits::One)
        }

        fn timeout(&self) -> Duration {
            Duration::from_millis(10)
        }

        fn set_baud_rate(&mut self, _baud_rate: u32) -> serialport::Result<()> {
            Ok(())
        }

        fn set_data_bits(&mut self, _data_bits: DataBits) -> serialport::Result<()> {
            Ok(())
        }

        fn set_flow_control(&mut self, _flow_control: FlowControl) -> serialport::Result<()> {
            Ok(())
        }

        fn set_parity(&mut self, _parity: Parity) -> serialport::Result<()> {
            Ok(())
        }

        fn set_stop_bits(&mut self, _stop_bits: StopBits) -> serialport::Result<()> {
            Ok(())
        }

        fn set_timeout(&mut self, _timeout: Duration) -> serialport::Result<()> {
            Ok(())
        }

        fn write_request_to_send(&mut self, _level: bool) -> serialport::Result<()> {
            Ok(())
        }

        fn write_data_terminal_ready(&mut self, _level: bool) -> serialport::Result<()> {
            Ok(())
        }

        fn read_clear_to_send(&mut self) -> serialport::Result<bool> {
            Ok(false)
        }

        fn read_data_set_ready(&mut self) -> serialport::Result<bool> {
            Ok(false)
        }

        fn read_ring_indicator(&mut self) -> serialport::Result<bool> {
            Ok(false)
        }

        fn read_carrier_detect(&mut self) -> serialport::Result<bool> {
            Ok(false)
        }

        fn bytes_to_read(&self) -> serialport::Result<u32> {
            Ok(self.rx.len() as u32)
        }

        fn bytes_to_write(&self) -> serialport::Result<u32> {
            Ok(0)
        }

        fn clear(&self, _buffer_to_clear: ClearBuffer) -> serialport::Result<()> {
            Ok(())
        }

        fn try_clone(&self) -> serialport::Result<Box<dyn SerialPort>> {
            Err(serialport::Error::new(
                serialport::ErrorKind::Unknown,
                "mock port cannot be cloned",
            ))
        }

        fn set_break(&self) -> serialport::Result<()> {
            Ok(())
        }

        fn clear_break(&self) -> serialport::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn send_poll_writes_reference_command() {
        let mut port = MockPort::default();

        {
            let mut inverter = Esp3k5::new(&mut port, DEFAULT_STATION_ID);
            inverter.send_poll().unwrap();
        }

        assert_eq!(port.tx, [0x0A, 0x96, 0x61, 0x54, 0x18, 0x05, 0xCD]);
    }

    #[test]
    fn drain_publishes_one_record_per_frame() {
        let mut stream = vec![0x42, 0xB1, 0x00];
        stream.extend_from_slice(&FRAME);
        stream.extend_from_slice(&FRAME);

        let mut port = MockPort::with_rx(&stream);
        let mut inverter = Esp3k5::new(&mut port, DEFAULT_STATION_ID);

        let mut records: Vec<Telemetry> = Vec::new();
        let mut sink = |record: &Telemetry| records.push(record.clone());
        let published = inverter.drain(&mut sink).unwrap();

        assert_eq!(published, 2);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], records[1]);
        assert_eq!(records[0].solar_voltage_1, 360.5);
        assert_eq!(inverter.stats().frames, 2);
    }

    #[test]
    fn drain_returns_immediately_on_quiet_link() {
        let mut port = MockPort::default();
        let mut inverter = Esp3k5::new(&mut port, DEFAULT_STATION_ID);

        let mut sink = |_: &Telemetry| panic!("nothing to publish");
        assert_eq!(inverter.drain(&mut sink).unwrap(), 0);
    }

    #[test]
    fn poll_once_returns_first_record() {
        let mut port = MockPort::with_rx(&FRAME);
        let mut inverter = Esp3k5::new(&mut port, DEFAULT_STATION_ID);

        let record = inverter.poll_once(Duration::from_millis(50)).unwrap();
        assert_eq!(record.unwrap().energy_total, 99_999);
    }

    #[test]
    fn poll_once_times_out_quietly() {
        let mut port = MockPort::default();
        let mut inverter = Esp3k5::new(&mut port, DEFAULT_STATION_ID);

        let record = inverter.poll_once(Duration::from_millis(20)).unwrap();
        assert!(record.is_none());
    }
}
