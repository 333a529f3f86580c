use beach_chat_core::ChatMessage;
use parking_lot::RwLock;

/// Append-only, in-memory chat history.
///
/// Positions are stable: once an entry is appended its index never changes
/// and nothing is ever removed. The log grows without bound for the life of
/// the process.
#[derive(Debug, Default)]
pub struct MessageLog {
    entries: RwLock<Vec<ChatMessage>>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `message` and returns its position.
    pub fn append(&self, message: ChatMessage) -> usize {
        let mut entries = self.entries.write();
        entries.push(message);
        entries.len() - 1
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<ChatMessage> {
        self.entries.read().get(index).cloned()
    }

    /// Lazily walks the entries from `from` up to the length observed now.
    ///
    /// Each step takes the read lock on its own, so appenders are never held
    /// up by a consumer of the slice.
    pub fn slice(&self, from: usize) -> LogSlice<'_> {
        LogSlice {
            log: self,
            next: from,
            end: self.len(),
        }
    }

    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.entries.read().clone()
    }
}

pub struct LogSlice<'a> {
    log: &'a MessageLog,
    next: usize,
    end: usize,
}

impl Iterator for LogSlice<'_> {
    type Item = ChatMessage;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let message = self.log.get(self.next)?;
        self.next += 1;
        Some(message)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end.saturating_sub(self.next);
        (0, Some(remaining))
    }
}
