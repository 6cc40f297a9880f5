//! Decoding of CLIXML-serialized PowerShell error streams.

use log::debug;
use quick_xml::events::Event;
use quick_xml::reader::Reader;

pub const CLIXML_MARKER: &str = "#< CLIXML";

/// Turn a CLIXML stderr payload into plain text. Anything that is not
/// CLIXML, or fails to parse, is returned unchanged.
pub fn decode_stderr(stderr: &str) -> String {
    let trimmed = stderr.trim_start();
    if !trimmed.starts_with(CLIXML_MARKER) {
        return stderr.to_string();
    }
    match decode_document(&trimmed[CLIXML_MARKER.len()..]) {
        Ok(text) => text,
        Err(e) => {
            debug!("Passing stderr through, CLIXML parse failed: {}", e);
            stderr.to_string()
        }
    }
}

/// Concatenate the `<S>` records directly under `<Objs>`. Line-break
/// markers are dropped; records starting with `+ ` begin a new line.
fn decode_document(xml: &str) -> Result<String, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    let mut out = String::new();
    let mut depth = 0usize;
    let mut in_record = false;
    let mut record = String::new();
    let mut seen_root = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                if depth == 0 {
                    seen_root = true;
                }
                if depth == 1 && e.local_name().as_ref() == b"S" {
                    in_record = true;
                    record.clear();
                }
                depth += 1;
            }
            Event::End(e) => {
                depth = depth.saturating_sub(1);
                if in_record && depth == 1 && e.local_name().as_ref() == b"S" {
                    in_record = false;
                    let text = record.replace("_x000D_", "").replace("_x000A_", "");
                    if text.trim_start().starts_with("+ ") {
                        out.push('\n');
                    }
                    out.push_str(&text);
                }
            }
            Event::Text(t) if in_record => record.push_str(&t.unescape()?),
            Event::Eof => break,
            _ => {}
        }
    }

    if !seen_root || depth != 0 {
        return Err(quick_xml::Error::UnexpectedEof("Objs".to_string()));
    }
    Ok(out)
}
