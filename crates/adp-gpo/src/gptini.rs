//! `GPT.INI` at the root of a GPO's SYSVOL folder.
//!
//! `Version` packs the user-side version in the high 16 bits and the
//! computer-side version in the low 16 bits.

use crate::inf::{decode_text, CRLF};
use adp_core::{AdError, AdResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GptIni {
    lines: Vec<String>,
    /// Index of the `Version=` line, if there is one.
    version_line: Option<usize>,
    version: u32,
}

impl Default for GptIni {
    fn default() -> Self {
        Self {
            lines: vec!["[General]".to_string()],
            version_line: None,
            version: 0,
        }
    }
}

impl GptIni {
    pub fn parse(bytes: &[u8]) -> AdResult<GptIni> {
        let text = decode_text(bytes)?;
        let mut ini = GptIni {
            lines: text.lines().map(|l| l.trim_end_matches('\r').to_string()).collect(),
            version_line: None,
            version: 0,
        };
        while ini.lines.last().map(|l| l.trim().is_empty()).unwrap_or(false) {
            ini.lines.pop();
        }

        let mut in_general = false;
        for (i, line) in ini.lines.iter().enumerate() {
            let t = line.trim();
            if let Some(h) = t.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
                in_general = h.trim().eq_ignore_ascii_case("General");
                continue;
            }
            if !in_general {
                continue;
            }
            if let Some((k, v)) = t.split_once('=') {
                if k.trim().eq_ignore_ascii_case("Version") {
                    ini.version = v
                        .trim()
                        .parse()
                        .map_err(|_| AdError::parse(format!("invalid GPT.INI version '{}'", v.trim())))?;
                    ini.version_line = Some(i);
                }
            }
        }
        Ok(ini)
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn user_version(&self) -> u16 {
        (self.version >> 16) as u16
    }

    pub fn computer_version(&self) -> u16 {
        (self.version & 0xFFFF) as u16
    }

    /// Increment the computer-side version, leaving the user side alone.
    pub fn bump_computer(&mut self) -> AdResult<u32> {
        let next = self
            .computer_version()
            .checked_add(1)
            .ok_or_else(|| AdError::invariant("GPO computer version is exhausted"))?;
        self.version = ((self.user_version() as u32) << 16) | next as u32;
        let line = format!("Version={}", self.version);
        match self.version_line {
            Some(i) => self.lines[i] = line,
            None => {
                let at = match self.lines.iter().position(|l| l.trim().eq_ignore_ascii_case("[General]")) {
                    Some(i) => i + 1,
                    None => {
                        self.lines.insert(0, "[General]".to_string());
                        1
                    }
                };
                self.lines.insert(at, line);
                self.version_line = Some(at);
            }
        }
        Ok(self.version)
    }

    /// The file with CRLF line breaks.
    pub fn emit(&self) -> Vec<u8> {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(line);
            out.push_str(CRLF);
        }
        out.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_version_halves() {
        let ini = GptIni::parse(b"[General]\r\nVersion=196612\r\ndisplayName=New Group Policy Object\r\n").unwrap();
        assert_eq!(ini.user_version(), 3);
        assert_eq!(ini.computer_version(), 4);
    }

    #[test]
    fn bump_keeps_user_side_and_other_lines() {
        let mut ini = GptIni::parse(b"[General]\nVersion=196612\ndisplayName=Baseline\n").unwrap();
        assert_eq!(ini.bump_computer().unwrap(), 196613);
        assert_eq!(ini.user_version(), 3);
        assert_eq!(
            String::from_utf8(ini.emit()).unwrap(),
            "[General]\r\nVersion=196613\r\ndisplayName=Baseline\r\n"
        );
    }

    #[test]
    fn missing_version_starts_at_one() {
        let mut ini = GptIni::parse(b"[General]\r\ndisplayName=x\r\n").unwrap();
        assert_eq!(ini.bump_computer().unwrap(), 1);
        assert_eq!(String::from_utf8(ini.emit()).unwrap(), "[General]\r\nVersion=1\r\ndisplayName=x\r\n");

        let mut empty = GptIni::default();
        empty.bump_computer().unwrap();
        assert_eq!(String::from_utf8(empty.emit()).unwrap(), "[General]\r\nVersion=1\r\n");
    }

    #[test]
    fn exhausted_computer_version() {
        let mut ini = GptIni::parse(b"[General]\r\nVersion=65535\r\n").unwrap();
        assert!(ini.bump_computer().is_err());
        assert!(GptIni::parse(b"[General]\r\nVersion=abc\r\n").is_err());
    }
}
