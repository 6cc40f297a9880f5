//! WS-Management SOAP envelopes and response parsing.
//!
//! Only the remote shell (WinRS) subset is needed: create a shell, start a
//! command, receive its output, signal it and delete the shell.

use adp_core::{AdError, AdResult};
use base64::Engine;
use quick_xml::events::Event;
use quick_xml::reader::Reader;

// ─── Protocol constants ──────────────────────────────────────────────────────

pub mod ns {
    pub const SOAP: &str = "http://www.w3.org/2003/05/soap-envelope";
    pub const ADDRESSING: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing";
    pub const WSMAN: &str = "http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd";
    pub const WSMAND: &str = "http://schemas.microsoft.com/wbem/wsman/1/wsman.xsd";
    pub const SHELL: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell";
}

pub mod action {
    pub const CREATE: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Create";
    pub const DELETE: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Delete";
    pub const COMMAND: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Command";
    pub const RECEIVE: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Receive";
    pub const SIGNAL: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Signal";
}

pub const SHELL_RESOURCE_URI: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/cmd";
pub const SIGNAL_TERMINATE: &str =
    "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/signal/terminate";

/// WSMAN fault code for an operation timeout on Receive; the command is
/// still running and the receive should simply be repeated.
pub const FAULT_OPERATION_TIMEOUT: &str = "2150858793";

const MAX_ENVELOPE_SIZE: u32 = 153_600;

/// Per-request parameters common to every envelope.
#[derive(Debug, Clone)]
pub struct EnvelopeContext<'a> {
    pub endpoint: &'a str,
    pub message_id: &'a str,
    pub timeout: &'a str,
    pub locale: &'a str,
}

// ─── Envelope builders ───────────────────────────────────────────────────────

fn build_header(
    ctx: &EnvelopeContext<'_>,
    action: &str,
    shell_id: Option<&str>,
    options: &[(&str, &str)],
) -> String {
    let mut header = format!(
        r#"<s:Header>
      <a:To>{endpoint}</a:To>
      <a:ReplyTo>
        <a:Address s:mustUnderstand="true">http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous</a:Address>
      </a:ReplyTo>
      <w:ResourceURI s:mustUnderstand="true">{resource}</w:ResourceURI>
      <a:Action s:mustUnderstand="true">{action}</a:Action>
      <w:MaxEnvelopeSize s:mustUnderstand="true">{max}</w:MaxEnvelopeSize>
      <a:MessageID>uuid:{message_id}</a:MessageID>
      <w:Locale xml:lang="{locale}" s:mustUnderstand="false"/>
      <p:DataLocale xml:lang="{locale}" s:mustUnderstand="false"/>
      <w:OperationTimeout>{timeout}</w:OperationTimeout>"#,
        endpoint = xml_escape(ctx.endpoint),
        resource = SHELL_RESOURCE_URI,
        action = action,
        max = MAX_ENVELOPE_SIZE,
        message_id = ctx.message_id,
        locale = ctx.locale,
        timeout = ctx.timeout,
    );

    if let Some(sid) = shell_id {
        header.push_str(&format!(
            r#"
      <w:SelectorSet>
        <w:Selector Name="ShellId">{}</w:Selector>
      </w:SelectorSet>"#,
            xml_escape(sid)
        ));
    }

    if !options.is_empty() {
        header.push_str("\n      <w:OptionSet>");
        for (name, value) in options {
            header.push_str(&format!(
                r#"
        <w:Option Name="{}">{}</w:Option>"#,
                name, value
            ));
        }
        header.push_str("\n      </w:OptionSet>");
    }

    header.push_str("\n    </s:Header>");
    header
}

fn wrap_envelope(header: &str, body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="{soap}" xmlns:a="{addr}" xmlns:w="{wsman}" xmlns:p="{wsmand}" xmlns:rsp="{shell}">
    {header}
    <s:Body>
      {body}
    </s:Body>
</s:Envelope>"#,
        soap = ns::SOAP,
        addr = ns::ADDRESSING,
        wsman = ns::WSMAN,
        wsmand = ns::WSMAND,
        shell = ns::SHELL,
        header = header,
        body = body,
    )
}

pub fn create_shell(ctx: &EnvelopeContext<'_>) -> String {
    let header = build_header(
        ctx,
        action::CREATE,
        None,
        &[("WINRS_NOPROFILE", "TRUE"), ("WINRS_CODEPAGE", "65001")],
    );
    let body = r#"<rsp:Shell>
        <rsp:InputStreams>stdin</rsp:InputStreams>
        <rsp:OutputStreams>stdout stderr</rsp:OutputStreams>
      </rsp:Shell>"#;
    wrap_envelope(&header, body)
}

pub fn delete_shell(ctx: &EnvelopeContext<'_>, shell_id: &str) -> String {
    let header = build_header(ctx, action::DELETE, Some(shell_id), &[]);
    wrap_envelope(&header, "")
}

pub fn command(ctx: &EnvelopeContext<'_>, shell_id: &str, command: &str, arguments: &[String]) -> String {
    let header = build_header(
        ctx,
        action::COMMAND,
        Some(shell_id),
        &[("WINRS_CONSOLEMODE_STDIN", "TRUE"), ("WINRS_SKIP_CMD_SHELL", "FALSE")],
    );
    let args_xml: String = arguments
        .iter()
        .map(|a| format!("<rsp:Arguments>{}</rsp:Arguments>", xml_escape(a)))
        .collect::<Vec<_>>()
        .join("\n        ");
    let body = format!(
        r#"<rsp:CommandLine>
        <rsp:Command>{command}</rsp:Command>
        {args}
      </rsp:CommandLine>"#,
        command = xml_escape(command),
        args = args_xml,
    );
    wrap_envelope(&header, &body)
}

pub fn receive(ctx: &EnvelopeContext<'_>, shell_id: &str, command_id: &str) -> String {
    let header = build_header(
        ctx,
        action::RECEIVE,
        Some(shell_id),
        &[("WSMAN_CMDSHELL_OPTION_KEEPALIVE", "TRUE")],
    );
    let body = format!(
        r#"<rsp:Receive>
        <rsp:DesiredStream CommandId="{}">stdout stderr</rsp:DesiredStream>
      </rsp:Receive>"#,
        xml_escape(command_id)
    );
    wrap_envelope(&header, &body)
}

pub fn signal(ctx: &EnvelopeContext<'_>, shell_id: &str, command_id: &str, code: &str) -> String {
    let header = build_header(ctx, action::SIGNAL, Some(shell_id), &[]);
    let body = format!(
        r#"<rsp:Signal CommandId="{}">
        <rsp:Code>{}</rsp:Code>
      </rsp:Signal>"#,
        xml_escape(command_id),
        code
    );
    wrap_envelope(&header, &body)
}

// ─── Response parsers ────────────────────────────────────────────────────────

/// Output of one Receive round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiveChunk {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub done: bool,
    pub exit_code: Option<i32>,
}

fn xml_error(e: impl std::fmt::Display) -> AdError {
    AdError::parse(format!("malformed WS-Management response: {}", e))
}

/// Text of the first element with the given local name.
fn first_element_text(response: &str, local: &[u8]) -> AdResult<Option<String>> {
    let mut reader = Reader::from_str(response);
    reader.trim_text(true);
    let mut inside = false;
    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(e) if e.local_name().as_ref() == local => inside = true,
            Event::Text(t) if inside => {
                return Ok(Some(t.unescape().map_err(xml_error)?.into_owned()));
            }
            Event::End(e) if e.local_name().as_ref() == local => inside = false,
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

/// The ShellId of a Create response.
pub fn parse_shell_id(response: &str) -> AdResult<String> {
    first_element_text(response, b"ShellId")?
        .ok_or_else(|| AdError::parse("Create response carries no ShellId"))
}

/// The CommandId of a Command response.
pub fn parse_command_id(response: &str) -> AdResult<String> {
    first_element_text(response, b"CommandId")?
        .ok_or_else(|| AdError::parse("Command response carries no CommandId"))
}

/// Decode the streams, command state and exit code of a Receive response.
pub fn parse_receive(response: &str) -> AdResult<ReceiveChunk> {
    let mut reader = Reader::from_str(response);
    reader.trim_text(true);
    let mut chunk = ReceiveChunk::default();

    #[derive(PartialEq)]
    enum Target {
        None,
        Stdout,
        Stderr,
        ExitCode,
    }
    let mut target = Target::None;

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"Stream" => {
                    target = Target::None;
                    for attr in e.attributes() {
                        let attr = attr.map_err(xml_error)?;
                        if attr.key.local_name().as_ref() == b"Name" {
                            match attr.unescape_value().map_err(xml_error)?.as_ref() {
                                "stdout" => target = Target::Stdout,
                                "stderr" => target = Target::Stderr,
                                _ => {}
                            }
                        }
                    }
                }
                b"CommandState" => chunk.done |= command_state_done(&e)?,
                b"ExitCode" => target = Target::ExitCode,
                _ => {}
            },
            Event::Empty(e) => {
                if e.local_name().as_ref() == b"CommandState" {
                    chunk.done |= command_state_done(&e)?;
                }
            }
            Event::Text(t) => {
                let text = t.unescape().map_err(xml_error)?;
                match target {
                    Target::Stdout | Target::Stderr => {
                        let decoded = base64::engine::general_purpose::STANDARD
                            .decode(text.trim())
                            .map_err(|e| AdError::parse(format!("invalid stream data: {}", e)))?;
                        if target == Target::Stdout {
                            chunk.stdout.extend_from_slice(&decoded);
                        } else {
                            chunk.stderr.extend_from_slice(&decoded);
                        }
                    }
                    Target::ExitCode => {
                        chunk.exit_code = text.trim().parse::<i32>().ok();
                    }
                    Target::None => {}
                }
            }
            Event::End(_) => target = Target::None,
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(chunk)
}

fn command_state_done(e: &quick_xml::events::BytesStart<'_>) -> AdResult<bool> {
    for attr in e.attributes() {
        let attr = attr.map_err(xml_error)?;
        if attr.key.local_name().as_ref() == b"State" {
            let value = attr.unescape_value().map_err(xml_error)?;
            return Ok(value.ends_with("/Done") || value.as_ref() == "Done");
        }
    }
    Ok(false)
}

/// Extract the human readable text of a SOAP/WSMAN fault.
pub fn parse_soap_fault(response: &str) -> Option<String> {
    if let Ok(Some(message)) = first_element_text(response, b"Message") {
        if !message.trim().is_empty() {
            return Some(message.trim().to_string());
        }
    }
    match first_element_text(response, b"Text") {
        Ok(Some(text)) if !text.trim().is_empty() => Some(text.trim().to_string()),
        _ => None,
    }
}

/// XML-escape a string for inclusion in SOAP envelopes.
pub fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
