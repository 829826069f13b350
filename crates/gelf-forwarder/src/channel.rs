// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded FIFO connecting every input to the single output.

use crate::errors::ChannelError;
use crate::message::Message;
use tokio::sync::mpsc;

/// Creates the delivery channel. A capacity of zero is bumped to one.
pub fn delivery_channel(capacity: usize) -> (MessageSender, MessageReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (MessageSender { tx }, MessageReceiver { rx })
}

/// Producer half, cloned into every input.
#[derive(Debug, Clone)]
pub struct MessageSender {
    tx: mpsc::Sender<Message>,
}

impl MessageSender {
    /// Enqueues, waiting for free space when the channel is full.
    pub async fn send(&self, message: Message) -> Result<(), ChannelError> {
        self.tx.send(message).await.map_err(|_| ChannelError::Closed)
    }

    /// Enqueues without waiting.
    pub fn try_send(&self, message: Message) -> Result<(), ChannelError> {
        self.tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ChannelError::Full,
            mpsc::error::TrySendError::Closed(_) => ChannelError::Closed,
        })
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Whether `incoming` more messages would overflow the channel right now.
    pub fn would_overflow(&self, incoming: usize) -> bool {
        incoming + self.len() > self.capacity()
    }
}

/// Consumer half, owned by the output.
#[derive(Debug)]
pub struct MessageReceiver {
    rx: mpsc::Receiver<Message>,
}

impl MessageReceiver {
    /// Waits for the next message. `None` once every sender is gone and the queue is empty.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Takes the next message if one is immediately available.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
