//! Streamed generation results.
//!
//! Generation is asynchronous: issuing a request returns a
//! [`GenerationStream`] immediately, and fragments arrive in order on a
//! background task. Concatenating the fragments in arrival order
//! reconstructs the full reply; the terminal element has `is_final = true`
//! and may carry an empty fragment.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::SessionError;

/// One element of a generation stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFragment {
    /// Partial reply text. May be empty on the terminal element.
    pub text: String,
    /// `true` on the last element of the stream.
    pub is_final: bool,
}

/// Item type carried by the fragment channel.
pub type FragmentResult = std::result::Result<StreamFragment, SessionError>;

/// Receiving half of the fragment channel, as produced by a backend.
pub type FragmentReceiver = mpsc::UnboundedReceiver<FragmentResult>;

/// Creates a connected fragment channel.
#[must_use]
pub fn fragment_channel() -> (FragmentSender, FragmentReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (FragmentSender { tx }, rx)
}

/// Sending half of the fragment channel, held by the backend worker.
#[derive(Debug, Clone)]
pub struct FragmentSender {
    tx: mpsc::UnboundedSender<FragmentResult>,
}

impl FragmentSender {
    /// Sends a non-final text fragment.
    ///
    /// Returns `false` if the receiver has been dropped, which a worker
    /// should treat as a signal to stop generating.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.tx
            .send(Ok(StreamFragment {
                text: text.into(),
                is_final: false,
            }))
            .is_ok()
    }

    /// Terminates the stream with an empty final fragment.
    pub fn finish(&self) {
        let _ = self.tx.send(Ok(StreamFragment {
            text: String::new(),
            is_final: true,
        }));
    }

    /// Terminates the stream with an error.
    pub fn fail(&self, error: SessionError) {
        let _ = self.tx.send(Err(error));
    }
}

/// An in-flight generation.
///
/// Dropping the stream does not stop the generation; the backend runs to
/// completion unless [`GenerationStream::cancel`] is called. After a
/// cancellation the owning session must be reset before it can generate
/// again.
#[derive(Debug)]
pub struct GenerationStream {
    rx: FragmentReceiver,
    cancel: CancellationToken,
    done: bool,
}

impl GenerationStream {
    pub(crate) fn new(rx: FragmentReceiver, cancel: CancellationToken) -> Self {
        Self {
            rx,
            cancel,
            done: false,
        }
    }

    /// Receives the next fragment, in arrival order.
    ///
    /// Returns `None` once the terminal fragment or an error has been
    /// yielded. A channel that closes without a terminal fragment is
    /// reported as a generation error.
    pub async fn next(&mut self) -> Option<FragmentResult> {
        if self.done {
            return None;
        }
        match self.rx.recv().await {
            Some(Ok(fragment)) => {
                if fragment.is_final {
                    self.done = true;
                }
                Some(Ok(fragment))
            }
            Some(Err(error)) => {
                self.done = true;
                Some(Err(error))
            }
            None => {
                self.done = true;
                Some(Err(SessionError::generation(
                    "stream closed without a final fragment",
                )))
            }
        }
    }

    /// Drains the stream and returns the concatenated reply text.
    ///
    /// # Errors
    ///
    /// Returns the first mid-stream error, discarding any fragments
    /// accumulated before it.
    pub async fn collect_text(mut self) -> std::result::Result<String, SessionError> {
        let mut buffer = String::new();
        while let Some(item) = self.next().await {
            let fragment = item?;
            buffer.push_str(&fragment.text);
            if fragment.is_final {
                break;
            }
        }
        Ok(buffer)
    }

    /// Requests cancellation of the in-flight generation.
    ///
    /// The backend stops at its next check point and still terminates the
    /// stream with a final fragment. The session is left tainted.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns a clone of the stream's cancellation token.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}
