/// Line protocol spoken by the irrigation controller
use log::trace;

use crate::errors::DecodeError;
use crate::models::{ActuatorCommand, Reading, ServerTimestamp, TelemetrySample};

// Frame layout constants
const FRAME_START: char = '<';
const FRAME_END: char = '>';
const FIELD_SEPARATOR: char = ',';
const FIELD_COUNT: usize = 5;
const VALVE_OPEN_FLAG: &str = "1";

/// Decode one controller line into a sample and valve command
///
/// The controller prints one frame per line:
/// - `<humidity,temperature,moisture,water_level,valve>`
/// - the first four fields are decimal numbers
/// - `valve` is `1` when the valve is open, anything else means closed
///
/// Lines that are not shaped like a frame (boot banners, partial reads) are
/// not errors and yield `Ok(None)`. A frame whose numeric fields do not parse
/// is an error the caller can log before moving on.
///
/// # Arguments
/// * `line` - Raw bytes of one line with the terminator already removed
///
/// # Returns
/// `Ok(Some(reading))` for a valid frame, `Ok(None)` for noise, or
/// `Err(DecodeError)` when a numeric field is malformed
pub fn decode(line: &[u8]) -> Result<Option<Reading>, DecodeError> {
    // Undecodable bytes are dropped rather than failing the line
    let mut text = String::with_capacity(line.len());
    for chunk in line.utf8_chunks() {
        text.push_str(chunk.valid());
    }
    let text = text.trim();

    let inner = match text
        .strip_prefix(FRAME_START)
        .and_then(|rest| rest.strip_suffix(FRAME_END))
    {
        Some(inner) => inner,
        None => {
            trace!("Ignoring non-frame line: {:?}", text);
            return Ok(None);
        }
    };

    let fields: Vec<&str> = inner.split(FIELD_SEPARATOR).collect();
    if fields.len() != FIELD_COUNT {
        trace!(
            "Ignoring frame with {} fields (expected {}): {:?}",
            fields.len(),
            FIELD_COUNT,
            text
        );
        return Ok(None);
    }

    let sample = TelemetrySample {
        humidity: parse_field("humidity", fields[0])?,
        temperature: parse_field("temperature", fields[1])?,
        moisture: parse_field("moisture", fields[2])?,
        water_level: parse_field("water_level", fields[3])?,
        timestamp: ServerTimestamp,
    };
    let command = ActuatorCommand {
        valve_open: fields[4] == VALVE_OPEN_FLAG,
    };

    Ok(Some(Reading { sample, command }))
}

/// Encode a valve command for the controller
///
/// Outbound commands are bare tokens without the `<...>` framing used inbound.
pub fn encode(command: &ActuatorCommand) -> &'static [u8] {
    if command.valve_open {
        b"ON"
    } else {
        b"OFF"
    }
}

fn parse_field(field: &'static str, raw: &str) -> Result<f64, DecodeError> {
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(DecodeError::InvalidNumber {
            field,
            value: raw.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(humidity: f64, temperature: f64, moisture: f64, water_level: f64) -> TelemetrySample {
        TelemetrySample {
            humidity,
            temperature,
            moisture,
            water_level,
            timestamp: ServerTimestamp,
        }
    }

    #[test]
    fn decodes_frame_with_open_valve() {
        let reading = decode(b"<1.5,20.0,30,40,1>").unwrap().unwrap();

        assert_eq!(reading.sample, sample(1.5, 20.0, 30.0, 40.0));
        assert_eq!(reading.command, ActuatorCommand { valve_open: true });
    }

    #[test]
    fn decodes_frame_with_closed_valve() {
        let reading = decode(b"<1.5,20.0,30,40,0>").unwrap().unwrap();

        assert_eq!(reading.sample, sample(1.5, 20.0, 30.0, 40.0));
        assert_eq!(reading.command, ActuatorCommand { valve_open: false });
    }

    #[test]
    fn any_flag_other_than_one_closes_valve() {
        for flag in ["2", "on", "", "01", "true"] {
            let line = format!("<1,2,3,4,{}>", flag);
            let reading = decode(line.as_bytes()).unwrap().unwrap();
            assert!(!reading.command.valve_open, "flag {:?}", flag);
        }
    }

    #[test]
    fn ignores_wrong_field_count() {
        assert_eq!(decode(b"<1.5,20.0,30,40>").unwrap(), None);
        assert_eq!(decode(b"<1.5,20.0,30,40,1,7>").unwrap(), None);
        assert_eq!(decode(b"<>").unwrap(), None);
    }

    #[test]
    fn ignores_lines_without_delimiters() {
        for line in [
            &b"no brackets here"[..],
            b"",
            b"   ",
            b"<",
            b">",
            b"1.5,20.0,30,40,1",
            b"<1.5,20.0,30,40,1",
            b"1.5,20.0,30,40,1>",
            b"booting <v1.2>!",
        ] {
            assert_eq!(decode(line).unwrap(), None, "line {:?}", line);
        }
    }

    #[test]
    fn tolerates_surrounding_whitespace_and_invalid_utf8() {
        let reading = decode(b"\xff  <1.5, 20.0 ,30,40,1>\r ").unwrap().unwrap();
        assert_eq!(reading.sample, sample(1.5, 20.0, 30.0, 40.0));

        let reading = decode(b"<1.\xfe5,20.0,30,40,0>").unwrap().unwrap();
        assert_eq!(reading.sample.humidity, 1.5);
    }

    #[test]
    fn keeps_replacement_characters_sent_by_the_controller() {
        // A literal U+FFFD is valid UTF-8 and belongs to the field
        assert_eq!(
            decode(b"<1.\xef\xbf\xbd5,20.0,30,40,0>"),
            Err(DecodeError::InvalidNumber {
                field: "humidity",
                value: "1.\u{FFFD}5".into()
            })
        );
    }

    #[test]
    fn accepts_signed_values() {
        let reading = decode(b"<-1.25,+3,0,-0.5,1>").unwrap().unwrap();
        assert_eq!(reading.sample, sample(-1.25, 3.0, 0.0, -0.5));
    }

    #[test]
    fn reports_non_numeric_fields() {
        assert_eq!(
            decode(b"<abc,20.0,30,40,1>"),
            Err(DecodeError::InvalidNumber {
                field: "humidity",
                value: "abc".into()
            })
        );
        assert!(matches!(
            decode(b"<1.5,20.0,,40,1>"),
            Err(DecodeError::InvalidNumber { field: "moisture", .. })
        ));
        assert!(matches!(
            decode(b"<1.5,20.0,30,4x0,1>"),
            Err(DecodeError::InvalidNumber { field: "water_level", .. })
        ));
    }

    #[test]
    fn rejects_non_finite_numbers() {
        assert!(matches!(
            decode(b"<1.5,NaN,30,40,1>"),
            Err(DecodeError::InvalidNumber { field: "temperature", .. })
        ));
        assert!(decode(b"<inf,20.0,30,40,1>").is_err());
    }

    #[test]
    fn encodes_bare_tokens() {
        assert_eq!(encode(&ActuatorCommand { valve_open: true }), b"ON");
        assert_eq!(encode(&ActuatorCommand { valve_open: false }), b"OFF");
    }
}
