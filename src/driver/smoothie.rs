//! Blocking serial driver for the smoothie motion board.
//!
//! Thin G-code layer over the `serialport` crate. Every command is a single
//! line terminated with `\r\n`; the board answers with zero or more data
//! lines followed by `ok`. The driver runs only on the executor's dedicated
//! worker thread, so all I/O here is plain blocking I/O.
//!
//! Speed and current push/pop are tracked host-side: the board has no
//! notion of a value stack, so the driver records the value it last sent
//! and replays the prior one on pop.

use super::MotionDriver;
use crate::error::{HwError, HwResult};
use crate::types::{Axis, Mount, PositionMap};
use log::debug;
use serialport::SerialPort;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::time::{Duration, Instant};

const GCODE_MOVE: &str = "G0";
const GCODE_HOME: &str = "G28.2";
const GCODE_POSITION: &str = "M114.2";
const GCODE_SET_CURRENT: &str = "M907";
const GCODE_READ_INSTRUMENT_ID: &str = "M369";
const GCODE_READ_INSTRUMENT_MODEL: &str = "M371";
const GCODE_LIGHT_ON: &str = "M106";
const GCODE_LIGHT_OFF: &str = "M107";
const GCODE_VERSION: &str = "M115";

const LINE_TERMINATOR: &str = "\r\n";
const ACK: &str = "ok";
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default combined-axis speed in mm/s, applied on connect.
const DEFAULT_SPEED: f64 = 400.0;

/// Driver for a smoothie board on a local serial port.
pub struct SmoothieDriver {
    port_name: String,
    baud_rate: u32,
    port: Option<Box<dyn SerialPort>>,
    speed: f64,
    speed_stack: Vec<f64>,
    current: HashMap<Axis, f64>,
    current_stack: Vec<HashMap<Axis, f64>>,
}

impl SmoothieDriver {
    /// A driver for the board at `port_name`, not yet connected.
    pub fn new(port_name: &str, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.to_string(),
            baud_rate,
            port: None,
            speed: DEFAULT_SPEED,
            speed_stack: Vec::new(),
            current: HashMap::new(),
            current_stack: Vec::new(),
        }
    }

    /// Send one command line and collect the response up to the `ok` ack.
    fn send_command(&mut self, command: &str) -> HwResult<String> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| HwError::Motion("smoothie driver is not connected".to_string()))?;

        port.write_all(format!("{command}{LINE_TERMINATOR}").as_bytes())?;
        port.flush()?;
        debug!("[smoothie] sent: {command}");

        let start = Instant::now();
        let mut response = String::new();
        let mut buffer = [0u8; 256];
        loop {
            if start.elapsed() > RESPONSE_TIMEOUT {
                return Err(HwError::Motion(format!(
                    "timed out after {RESPONSE_TIMEOUT:?} waiting for a response to {command}"
                )));
            }
            match port.read(&mut buffer) {
                Ok(0) => continue,
                Ok(n) => {
                    response.push_str(&String::from_utf8_lossy(&buffer[..n]));
                    if response.lines().any(|line| line.trim() == ACK) {
                        break;
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(err) => return Err(err.into()),
            }
        }

        let response = response
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && *line != ACK)
            .collect::<Vec<_>>()
            .join("\n");
        debug!("[smoothie] received: {response}");
        Ok(response)
    }

    /// Parse a position report such as `MCS: X:10.0 Y:20.0 Z:218.0 ...`.
    fn parse_position_report(report: &str) -> HwResult<PositionMap> {
        let mut positions = PositionMap::new();
        for token in report.split_whitespace() {
            let Some((name, value)) = token.split_once(':') else {
                continue;
            };
            let axis = match name {
                "X" => Axis::X,
                "Y" => Axis::Y,
                "Z" => Axis::Z,
                "A" => Axis::A,
                "B" => Axis::B,
                "C" => Axis::C,
                _ => continue,
            };
            let coordinate = value.parse::<f64>().map_err(|_| {
                HwError::Motion(format!("unparseable coordinate in position report: {token}"))
            })?;
            positions.insert(axis, coordinate);
        }
        if positions.is_empty() {
            return Err(HwError::Motion(format!(
                "no axis coordinates in position report: {report}"
            )));
        }
        Ok(positions)
    }

    fn update_position(&mut self) -> HwResult<PositionMap> {
        let report = self.send_command(GCODE_POSITION)?;
        Self::parse_position_report(&report)
    }

    /// Read one field of the instrument EEPROM at `mount`. The board
    /// answers with `<mount>:<value>` or an empty line when nothing is
    /// attached.
    fn read_instrument_field(&mut self, gcode: &str, mount: Mount) -> HwResult<Option<String>> {
        let flag = match mount {
            Mount::Left => "L",
            Mount::Right => "R",
        };
        let response = self.send_command(&format!("{gcode} {flag}"))?;
        let value = response
            .split_once(':')
            .map(|(_, value)| value.trim().to_string())
            .filter(|value| !value.is_empty() && value != "_");
        Ok(value)
    }

    fn send_current(&mut self) -> HwResult<()> {
        if self.current.is_empty() {
            return Ok(());
        }
        let mut command = String::from(GCODE_SET_CURRENT);
        for axis in Axis::ALL {
            if let Some(amps) = self.current.get(&axis) {
                command.push_str(&format!(" {axis}{amps:.2}"));
            }
        }
        self.send_command(&command)?;
        Ok(())
    }
}

impl MotionDriver for SmoothieDriver {
    fn connect(&mut self) -> HwResult<()> {
        let port = serialport::new(&self.port_name, self.baud_rate)
            // Short device timeout; send_command loops until the ack.
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|err| {
                HwError::Motion(format!(
                    "failed to open serial port '{}' at {} baud: {err}",
                    self.port_name, self.baud_rate
                ))
            })?;
        self.port = Some(port);
        self.send_command(GCODE_VERSION)?;
        self.set_speed(self.speed)?;
        Ok(())
    }

    fn move_to(&mut self, targets: &PositionMap, home_flagged_axes: bool) -> HwResult<()> {
        if home_flagged_axes {
            // The board refuses absolute moves on unhomed axes; home the
            // ones this move touches.
            let axes: Vec<Axis> = targets.keys().copied().collect();
            self.home(Some(&axes))?;
        }
        let mut command = String::from(GCODE_MOVE);
        for axis in Axis::ALL {
            if let Some(coordinate) = targets.get(&axis) {
                command.push_str(&format!(" {axis}{coordinate:.3}"));
            }
        }
        self.send_command(&command)?;
        Ok(())
    }

    fn home(&mut self, axes: Option<&[Axis]>) -> HwResult<PositionMap> {
        let mut command = String::from(GCODE_HOME);
        if let Some(axes) = axes {
            command.push(' ');
            for axis in axes {
                command.push_str(axis.as_str());
            }
        }
        self.send_command(&command)?;
        self.update_position()
    }

    fn fast_home(&mut self, axis: Axis, margin: f64) -> HwResult<PositionMap> {
        // Retract to within `margin` of the switch at full speed, then run
        // the ordinary (slow, switch-seeking) home on that axis alone.
        let positions = self.update_position()?;
        if let Some(&current) = positions.get(&axis) {
            let retract = (current - margin).max(0.0);
            self.move_to(&PositionMap::from([(axis, retract)]), false)?;
        }
        self.home(Some(&[axis]))
    }

    fn read_instrument_model(&mut self, mount: Mount) -> HwResult<Option<String>> {
        self.read_instrument_field(GCODE_READ_INSTRUMENT_MODEL, mount)
    }

    fn read_instrument_id(&mut self, mount: Mount) -> HwResult<Option<String>> {
        self.read_instrument_field(GCODE_READ_INSTRUMENT_ID, mount)
    }

    fn set_active_current(&mut self, currents: &HashMap<Axis, f64>) -> HwResult<()> {
        for (&axis, &amps) in currents {
            self.current.insert(axis, amps);
        }
        self.send_current()
    }

    fn push_active_current(&mut self) -> HwResult<()> {
        self.current_stack.push(self.current.clone());
        Ok(())
    }

    fn pop_active_current(&mut self) -> HwResult<()> {
        self.current = self
            .current_stack
            .pop()
            .ok_or_else(|| HwError::Motion("active current pop without push".to_string()))?;
        self.send_current()
    }

    fn set_speed(&mut self, value: f64) -> HwResult<()> {
        // The board takes feed rate in mm/min.
        let feed_rate = value * 60.0;
        self.send_command(&format!("{GCODE_MOVE} F{feed_rate:.0}"))?;
        self.speed = value;
        Ok(())
    }

    fn push_speed(&mut self) -> HwResult<()> {
        self.speed_stack.push(self.speed);
        Ok(())
    }

    fn pop_speed(&mut self) -> HwResult<()> {
        let speed = self
            .speed_stack
            .pop()
            .ok_or_else(|| HwError::Motion("speed pop without push".to_string()))?;
        self.set_speed(speed)
    }

    fn set_button_light(&mut self, on: bool) -> HwResult<()> {
        // The indicator is wired to the board's fan header.
        let command = if on { GCODE_LIGHT_ON } else { GCODE_LIGHT_OFF };
        self.send_command(command)?;
        Ok(())
    }
}
