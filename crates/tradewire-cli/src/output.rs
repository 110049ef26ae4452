use std::io::{self, Write};

use tradewire_core::Payload;

use crate::commands::CommandOutput;
use crate::error::CliError;

pub fn render(output: &CommandOutput, pretty: bool) -> Result<(), CliError> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    write_output(&mut handle, output, pretty)?;
    handle.flush()?;
    Ok(())
}

fn write_output<W: Write>(writer: &mut W, output: &CommandOutput, pretty: bool) -> Result<(), CliError> {
    match output {
        CommandOutput::Message(message) => writeln!(writer, "{message}")?,
        CommandOutput::Payload(Payload::Empty) => {}
        CommandOutput::Payload(Payload::Json(value)) => {
            if pretty {
                serde_json::to_writer_pretty(&mut *writer, value)?;
            } else {
                serde_json::to_writer(&mut *writer, value)?;
            }
            writeln!(writer)?;
        }
        CommandOutput::Payload(Payload::Text(text)) => {
            write!(writer, "{text}")?;
            if !text.ends_with('\n') {
                writeln!(writer)?;
            }
        }
        CommandOutput::Payload(Payload::Binary(body)) => writeln!(
            writer,
            "<{} bytes of {}>",
            body.bytes.len(),
            body.content_type
                .as_deref()
                .unwrap_or("application/octet-stream")
        )?,
    }
    Ok(())
}
