//! Simulated hardware.
//!
//! | Class | Methods |
//! |-------|---------|
//! | `Led` | `on`, `off`, `toggle`, `isOn`, `brightness(level)`, `_reset` |
//! | `Relay` | `on`, `off`, `_pulse` |
//! | `Sensor` | `read`, `_calibrate(offset)` |
//! | `Servo` | `to(angle)`, `center`, `position` |
//!
//! Options: `Sensor` reads `value` (default `0`), `Servo` reads
//! `range` as `[min, max]` (default `[0, 180]`).

use super::hardware::{BoardInfo, Device, DeviceError, Hardware};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;

/// In-memory stand-in for a board and its devices.
#[derive(Debug, Clone, Default)]
pub struct SimHardware {
    open_delay: Option<Duration>,
    failure: Option<String>,
}

impl SimHardware {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `open` take `delay`.
    #[must_use]
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }

    /// Makes `open` fail with `message`.
    #[must_use]
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }
}

#[async_trait]
impl Hardware for SimHardware {
    async fn open(&self, options: &Map<String, Value>) -> Result<BoardInfo, DeviceError> {
        if let Some(delay) = self.open_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.failure {
            return Err(DeviceError::failed(message.clone()));
        }
        let port = options
            .get("port")
            .and_then(Value::as_str)
            .unwrap_or("sim")
            .to_string();
        Ok(BoardInfo { port: Some(port) })
    }

    fn create(
        &self,
        class: &str,
        options: &Map<String, Value>,
    ) -> Result<Box<dyn Device>, DeviceError> {
        let device: Box<dyn Device> = match class {
            "Led" => Box::new(SimLed::default()),
            "Relay" => Box::new(SimRelay::default()),
            "Sensor" => Box::new(SimSensor {
                value: options.get("value").and_then(Value::as_f64).unwrap_or(0.0),
                offset: 0.0,
            }),
            "Servo" => {
                let range = options
                    .get("range")
                    .and_then(Value::as_array)
                    .and_then(|r| Some((r.first()?.as_f64()?, r.get(1)?.as_f64()?)))
                    .unwrap_or((0.0, 180.0));
                Box::new(SimServo {
                    min: range.0,
                    max: range.1,
                    position: range.0,
                })
            }
            other => {
                return Err(DeviceError::UnknownClass {
                    class: other.to_string(),
                })
            }
        };
        Ok(device)
    }

    fn class_methods(&self, class: &str) -> Result<Vec<String>, DeviceError> {
        Ok(self.create(class, &Map::new())?.methods())
    }
}

fn names(methods: &[&str]) -> Vec<String> {
    methods.iter().map(|m| (*m).to_string()).collect()
}

fn no_method(method: &str) -> DeviceError {
    DeviceError::failed(format!("no such method \"{method}\""))
}

fn number_arg(args: &[Value], index: usize, method: &str) -> Result<f64, DeviceError> {
    args.get(index)
        .and_then(Value::as_f64)
        .ok_or_else(|| DeviceError::failed(format!("{method} expects a number")))
}

#[derive(Debug, Default)]
struct SimLed {
    on: bool,
    brightness: u8,
}

impl Device for SimLed {
    fn methods(&self) -> Vec<String> {
        names(&["on", "off", "toggle", "isOn", "brightness", "_reset"])
    }

    fn invoke(&mut self, method: &str, args: &[Value]) -> Result<Value, DeviceError> {
        match method {
            "on" => {
                self.on = true;
                self.brightness = 255;
            }
            "off" => {
                self.on = false;
                self.brightness = 0;
            }
            "toggle" => return self.invoke(if self.on { "off" } else { "on" }, args),
            "isOn" => return Ok(json!(self.on)),
            "brightness" => {
                let level = number_arg(args, 0, method)?;
                if !(0.0..=255.0).contains(&level) {
                    return Err(DeviceError::failed(format!(
                        "Brightness {level} out of range 0-255"
                    )));
                }
                // Range checked above.
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let level = level as u8;
                self.brightness = level;
                self.on = level > 0;
            }
            "_reset" => *self = Self::default(),
            other => return Err(no_method(other)),
        }
        Ok(json!({ "on": self.on, "brightness": self.brightness }))
    }
}

#[derive(Debug, Default)]
struct SimRelay {
    closed: bool,
}

impl Device for SimRelay {
    fn methods(&self) -> Vec<String> {
        names(&["on", "off", "_pulse"])
    }

    fn invoke(&mut self, method: &str, _args: &[Value]) -> Result<Value, DeviceError> {
        match method {
            "on" => self.closed = true,
            "off" | "_pulse" => self.closed = false,
            other => return Err(no_method(other)),
        }
        Ok(json!(self.closed))
    }
}

#[derive(Debug)]
struct SimSensor {
    value: f64,
    offset: f64,
}

impl Device for SimSensor {
    fn methods(&self) -> Vec<String> {
        names(&["read", "_calibrate"])
    }

    fn invoke(&mut self, method: &str, args: &[Value]) -> Result<Value, DeviceError> {
        match method {
            "read" => Ok(json!(self.value + self.offset)),
            "_calibrate" => {
                self.offset = number_arg(args, 0, method)?;
                Ok(Value::Null)
            }
            other => Err(no_method(other)),
        }
    }
}

#[derive(Debug)]
struct SimServo {
    min: f64,
    max: f64,
    position: f64,
}

impl Device for SimServo {
    fn methods(&self) -> Vec<String> {
        names(&["to", "center", "position"])
    }

    fn invoke(&mut self, method: &str, args: &[Value]) -> Result<Value, DeviceError> {
        match method {
            "to" => {
                let angle = number_arg(args, 0, method)?;
                if angle < self.min || angle > self.max {
                    return Err(DeviceError::failed(format!(
                        "Angle {angle} out of range {}-{}",
                        self.min, self.max
                    )));
                }
                self.position = angle;
            }
            "center" => self.position = (self.min + self.max) / 2.0,
            "position" => {}
            other => return Err(no_method(other)),
        }
        Ok(json!(self.position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_reports_port() {
        let hw = SimHardware::new();
        let mut opts = Map::new();
        opts.insert("port".into(), json!("/dev/ttyACM0"));
        assert_eq!(hw.open(&opts).await.unwrap().port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(hw.open(&Map::new()).await.unwrap().port.as_deref(), Some("sim"));
    }

    #[tokio::test]
    async fn failing_board_does_not_open() {
        let hw = SimHardware::new().failing("port busy");
        assert_eq!(
            hw.open(&Map::new()).await.unwrap_err(),
            DeviceError::failed("port busy")
        );
    }

    #[test]
    fn led_state_changes() {
        let mut led = SimHardware::new().create("Led", &Map::new()).unwrap();
        assert_eq!(led.invoke("isOn", &[]).unwrap(), json!(false));
        led.invoke("toggle", &[]).unwrap();
        assert_eq!(led.invoke("isOn", &[]).unwrap(), json!(true));
        assert_eq!(
            led.invoke("brightness", &[json!(300)]).unwrap_err().to_string(),
            "Brightness 300 out of range 0-255"
        );
    }

    #[test]
    fn servo_respects_range() {
        let mut opts = Map::new();
        opts.insert("range".into(), json!([10, 170]));
        let mut servo = SimHardware::new().create("Servo", &opts).unwrap();
        assert_eq!(servo.invoke("center", &[]).unwrap(), json!(90.0));
        assert!(servo.invoke("to", &[json!(5)]).is_err());
        assert_eq!(servo.invoke("to", &[json!(45)]).unwrap(), json!(45.0));
    }

    #[test]
    fn unknown_class() {
        match SimHardware::new().create("Bogus", &Map::new()) {
            Err(DeviceError::UnknownClass { class }) => assert_eq!(class, "Bogus"),
            other => panic!("expected UnknownClass, got: {other:?}"),
        }
        assert_eq!(
            SimHardware::new().class_methods("Relay").unwrap(),
            vec!["on", "off", "_pulse"]
        );
    }
}
