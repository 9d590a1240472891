//! Local terminal handling: raw mode, size, resize and signal watching,
//! and the detach escape sequence.

use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use ax_protocol::TerminalSize;

/// Puts the local terminal in raw mode for the lifetime of the guard
pub struct RawModeGuard(bool);

impl RawModeGuard {
    /// Enter raw mode when `enable` is set; failure is logged, not fatal
    pub fn enter(enable: bool) -> Self {
        if !enable {
            return Self(false);
        }
        match enable_raw_mode() {
            Ok(()) => Self(true),
            Err(e) => {
                tracing::warn!("Failed to enable raw mode: {}", e);
                Self(false)
            }
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.0 {
            let _ = disable_raw_mode();
        }
    }
}

/// Size of the local terminal, 24x80 when it cannot be determined
pub fn current_size() -> TerminalSize {
    match crossterm::terminal::size() {
        Ok((cols, rows)) if cols > 0 && rows > 0 => TerminalSize::new(rows, cols),
        _ => TerminalSize::default(),
    }
}

/// Forwards terminal size changes
pub struct ResizeWatcher;

impl ResizeWatcher {
    /// Watch for SIGWINCH until `cancel` fires
    pub fn spawn(cancel: CancellationToken) -> mpsc::Receiver<TerminalSize> {
        let (tx, rx) = mpsc::channel(8);

        #[cfg(unix)]
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};

            let mut winch = match signal(SignalKind::window_change()) {
                Ok(winch) => winch,
                Err(e) => {
                    tracing::warn!("Cannot watch terminal resizes: {}", e);
                    return;
                }
            };
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = winch.recv() => {
                        if received.is_none() {
                            break;
                        }
                        let size = current_size();
                        tracing::trace!("Terminal resized to {}x{}", size.cols, size.rows);
                        // Only the latest size matters
                        let _ = tx.try_send(size);
                    }
                }
            }
        });

        #[cfg(not(unix))]
        drop((tx, cancel));

        rx
    }
}

/// A signal delivered to the client process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalSignal {
    Interrupt,
    Terminate,
}

/// Deliver SIGINT and SIGTERM as [`LocalSignal`] values until `cancel` fires
pub fn watch_signals(cancel: CancellationToken) -> mpsc::Receiver<LocalSignal> {
    let (tx, rx) = mpsc::channel(4);

    tokio::spawn(async move {
        #[cfg(unix)]
        let mut terminate =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => Some(signal),
                Err(e) => {
                    tracing::warn!("Cannot watch SIGTERM: {}", e);
                    None
                }
            };

        loop {
            #[cfg(unix)]
            let terminated = async {
                match terminate.as_mut() {
                    Some(signal) => signal.recv().await,
                    None => std::future::pending().await,
                }
            };
            #[cfg(not(unix))]
            let terminated = std::future::pending::<Option<()>>();

            let signal = tokio::select! {
                _ = cancel.cancelled() => break,
                result = tokio::signal::ctrl_c() => match result {
                    Ok(()) => LocalSignal::Interrupt,
                    Err(e) => {
                        tracing::warn!("Cannot watch SIGINT: {}", e);
                        break;
                    }
                },
                _ = terminated => LocalSignal::Terminate,
            };

            tracing::debug!(?signal, "Local signal");
            if tx.send(signal).await.is_err() {
                break;
            }
        }
    });

    rx
}

/// Parse the `--escape` value: one ASCII character, or `none`
pub fn parse_escape_char(value: &str) -> Result<Option<char>, String> {
    if value.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii() && !c.is_ascii_control() => Ok(Some(c)),
        _ => Err(format!(
            "escape character must be a single printable ASCII character or \"none\", got {:?}",
            value
        )),
    }
}

/// Result of filtering one chunk of terminal input
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Filtered {
    /// Bytes to send to the remote
    pub data: Vec<u8>,
    /// The detach sequence was typed; anything after it is discarded
    pub detach: bool,
}

/// Recognises `<escape>.` at the start of a line as a request to detach,
/// and `<escape><escape>` as a literal escape character.
#[derive(Debug, Clone)]
pub struct EscapeFilter {
    escape: u8,
    at_line_start: bool,
    pending: bool,
}

impl EscapeFilter {
    /// `None` for non-ASCII escape characters, which cannot be matched bytewise
    pub fn new(escape: char) -> Option<Self> {
        escape.is_ascii().then(|| Self {
            escape: escape as u8,
            at_line_start: true,
            pending: false,
        })
    }

    pub fn feed(&mut self, input: &[u8]) -> Filtered {
        let mut out = Filtered {
            data: Vec::with_capacity(input.len()),
            detach: false,
        };

        for &byte in input {
            if self.pending {
                self.pending = false;
                if byte == b'.' {
                    out.detach = true;
                    return out;
                }
                out.data.push(self.escape);
                if byte == self.escape {
                    self.at_line_start = false;
                    continue;
                }
            } else if self.at_line_start && byte == self.escape {
                self.pending = true;
                continue;
            }

            out.data.push(byte);
            self.at_line_start = byte == b'\r' || byte == b'\n';
        }

        out
    }

    /// Escape character still held back when input ends
    pub fn finish(&mut self) -> Option<u8> {
        std::mem::take(&mut self.pending).then_some(self.escape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> EscapeFilter {
        EscapeFilter::new('~').unwrap()
    }

    #[test]
    fn test_detach_at_start_of_input() {
        let out = filter().feed(b"~.");
        assert!(out.detach);
        assert!(out.data.is_empty());
    }

    #[test]
    fn test_detach_after_newline_keeps_earlier_bytes() {
        let out = filter().feed(b"ls\r~.ignored");
        assert!(out.detach);
        assert_eq!(out.data, b"ls\r");
    }

    #[test]
    fn test_mid_line_escape_passes_through() {
        let out = filter().feed(b"echo ~.");
        assert!(!out.detach);
        assert_eq!(out.data, b"echo ~.");
    }

    #[test]
    fn test_double_escape_sends_one() {
        let out = filter().feed(b"~~.");
        assert!(!out.detach);
        assert_eq!(out.data, b"~.");
    }

    #[test]
    fn test_sequence_split_across_reads() {
        let mut filter = filter();
        let first = filter.feed(b"\n~");
        assert_eq!(first.data, b"\n");
        assert!(!first.detach);
        assert!(filter.feed(b".").detach);
    }

    #[test]
    fn test_escape_followed_by_other_byte() {
        let mut filter = filter();
        assert_eq!(filter.feed(b"~x").data, b"~x");
        let mut filter = self::filter();
        filter.feed(b"~");
        assert_eq!(filter.finish(), Some(b'~'));
        assert_eq!(filter.finish(), None);
    }

    #[test]
    fn test_parse_escape_char() {
        assert_eq!(parse_escape_char("~"), Ok(Some('~')));
        assert_eq!(parse_escape_char("none"), Ok(None));
        assert!(parse_escape_char("ab").is_err());
        assert!(parse_escape_char("").is_err());
        assert!(parse_escape_char("é").is_err());
    }
}
