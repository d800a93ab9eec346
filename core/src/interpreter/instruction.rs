//! Instruction decoding
//!
//! After template expansion an instruction reads
//! `[?][!][idle,pause,total,]command:payload`:
//! - `?` marks it non-strict (a final failure does not abort the sequence)
//! - `!` asks for parallel execution
//! - the timing triple is in whole time units and defaults to `0,0,0`

use super::errors::InstructionError;

/// Idle / pause / total-time budget of one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timing {
    /// One-time wait before the first attempt
    pub idle: i64,
    /// Wait between attempts; `<= 0` disables retry
    pub pause: i64,
    /// Retry budget
    pub total: i64,
}

impl Timing {
    /// Upper bound on `Run` attempts under this budget.
    pub fn max_attempts(&self) -> i64 {
        if self.total < 0 {
            0
        } else if self.pause <= 0 {
            1
        } else {
            self.total / self.pause + 1
        }
    }
}

/// A decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub strict: bool,
    pub parallel: bool,
    pub timing: Timing,
    /// Registry keyword before the first `:`
    pub command: String,
    /// Everything after the first `:`
    pub payload: String,
}

impl Instruction {
    pub fn parse(text: &str) -> Result<Self, InstructionError> {
        let mut strict = true;
        let mut parallel = false;

        let mut rest = text;
        for (i, c) in text.char_indices() {
            match c {
                '?' => strict = false,
                '!' => parallel = true,
                c if c <= ' ' => {}
                _ => {
                    rest = &text[i..];
                    break;
                }
            }
            rest = &text[i + c.len_utf8()..];
        }

        if rest.is_empty() {
            return Err(InstructionError::Empty);
        }

        let mut timing = Timing::default();
        if rest.starts_with(|c: char| c.is_ascii_digit()) {
            let (idle, after) = timing_value(rest, "first")?;
            let (pause, after) = timing_value(after, "second")?;
            let (total, after) = timing_value(after, "third")?;
            timing = Timing { idle, pause, total };
            rest = after;
        }

        let Some(pos) = rest.find(':').filter(|&p| p > 0) else {
            return Err(InstructionError::MissingCommand);
        };

        Ok(Instruction {
            strict,
            parallel,
            timing,
            command: rest[..pos].trim().to_string(),
            payload: rest[pos + 1..].to_string(),
        })
    }
}

fn timing_value<'a>(text: &'a str, position: &'static str) -> Result<(i64, &'a str), InstructionError> {
    let Some(comma) = text.find(',').filter(|&p| p > 0) else {
        return Err(InstructionError::BadTiming { position });
    };
    let value = text[..comma]
        .trim()
        .parse::<i64>()
        .map_err(|_| InstructionError::BadTiming { position })?;
    Ok((value, text[comma + 1..].trim_start()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_instruction_gets_zero_timing() {
        let ins = Instruction::parse("void:").unwrap();
        assert!(ins.strict);
        assert!(!ins.parallel);
        assert_eq!(ins.timing, Timing::default());
        assert_eq!(ins.command, "void");
        assert_eq!(ins.payload, "");
    }

    #[test]
    fn test_control_characters_and_timing() {
        let ins = Instruction::parse(" ?! 1, 2 , 10, http:{\"url\":\"x\"}").unwrap();
        assert!(!ins.strict);
        assert!(ins.parallel);
        assert_eq!(ins.timing, Timing { idle: 1, pause: 2, total: 10 });
        assert_eq!(ins.command, "http");
        assert_eq!(ins.payload, "{\"url\":\"x\"}");
    }

    #[test]
    fn test_payload_keeps_further_colons() {
        let ins = Instruction::parse("call:{\"action\":\"A\"}").unwrap();
        assert_eq!(ins.payload, "{\"action\":\"A\"}");
    }

    #[test]
    fn test_malformed_timing() {
        assert_eq!(
            Instruction::parse("1,x,3,void:"),
            Err(InstructionError::BadTiming { position: "second" })
        );
        assert_eq!(
            Instruction::parse("1,2,void:"),
            Err(InstructionError::BadTiming { position: "third" })
        );
    }

    #[test]
    fn test_missing_command() {
        assert_eq!(Instruction::parse("noColonHere"), Err(InstructionError::MissingCommand));
        assert_eq!(Instruction::parse(":payload"), Err(InstructionError::MissingCommand));
        assert_eq!(Instruction::parse("?!"), Err(InstructionError::Empty));
    }

    #[test]
    fn test_max_attempts() {
        assert_eq!(Timing { idle: 0, pause: 2, total: 5 }.max_attempts(), 3);
        assert_eq!(Timing { idle: 0, pause: 0, total: 5 }.max_attempts(), 1);
        assert_eq!(Timing { idle: 0, pause: 3, total: 0 }.max_attempts(), 1);
    }
}
