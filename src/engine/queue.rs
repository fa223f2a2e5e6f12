use std::collections::VecDeque;

/// FIFO of pending requests whose head is the one in flight.
///
/// The queue only orders; dispatching the head is the engine's job. The wire
/// protocol has no usable correlation token, so the head is how a reply is
/// matched to its request.
#[derive(Debug)]
pub(crate) struct CommandQueue<R> {
    items: VecDeque<R>,
}

impl<R> Default for CommandQueue<R> {
    fn default() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }
}

impl<R> CommandQueue<R> {
    /// Appends an item and returns whether it became the head.
    pub(crate) fn enqueue(&mut self, item: R) -> bool {
        self.items.push_back(item);
        self.items.len() == 1
    }

    /// Removes and returns the head.
    pub(crate) fn advance(&mut self) -> Option<R> {
        self.items.pop_front()
    }

    pub(crate) fn peek(&self) -> Option<&R> {
        self.items.front()
    }

    pub(crate) fn peek_mut(&mut self) -> Option<&mut R> {
        self.items.front_mut()
    }

    /// Drops every queued item.
    pub(crate) fn clear(&mut self) {
        self.items.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
