#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// UART bus master errors
pub enum UartError<E> {
    /// Serial peripheral errors.
    Serial(E),
    /// No echo arrived within the configured time budget.
    Timeout,
}

impl<E> From<E> for UartError<E> {
    fn from(value: E) -> Self {
        Self::Serial(value)
    }
}

impl<E: core::fmt::Debug> core::fmt::Display for UartError<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Serial(e) => write!(f, "serial error: {e:?}"),
            Self::Timeout => write!(f, "timed out waiting for a slot echo"),
        }
    }
}
