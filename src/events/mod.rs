use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed.
    /// Event delivery is observability plumbing and must never fail a workflow.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Failed to publish event: {}", e);
        }
    }
}

// The various events that can occur in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Order events
    OrderPlaced(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    TransactionStatusChanged {
        order_id: Uuid,
        new_status: String,
    },

    // Payment reconciliation events
    PaymentCaptured(Uuid),
    PaymentFailed(Uuid),
    PaymentAbandoned(Uuid),

    // Cart events
    CartItemAdded {
        cart_id: i64,
        bundle_id: i64,
        student_id: i64,
    },
    CartItemRemoved {
        cart_id: i64,
        bundle_id: i64,
    },
    CartCleared(i64),

    // Catalog events
    BundleCreated(i64),

    // Admin events
    SettingsUpdated,
}

// Function to process incoming events; side effects here must stay best-effort.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::OrderPlaced(order_id) => {
                if let Err(e) = handle_order_placed(order_id).await {
                    error!(
                        "Failed to handle order placed event: order_id={}, error={}",
                        order_id, e
                    );
                }
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(
                    "Order {} status changed: {} -> {}",
                    order_id, old_status, new_status
                );
            }
            Event::TransactionStatusChanged {
                order_id,
                new_status,
            } => {
                info!("Order {} transaction status now {}", order_id, new_status);
            }
            Event::PaymentCaptured(order_id) => {
                info!("Payment captured for order {}", order_id);
            }
            Event::PaymentFailed(order_id) => {
                warn!("Payment failed for order {}", order_id);
            }
            Event::PaymentAbandoned(order_id) => {
                info!("Checkout abandoned for order {}", order_id);
            }
            _ => {
                info!("No specific handler for event: {:?}", event);
            }
        }
    }

    warn!("Event processing loop has ended");
}

async fn handle_order_placed(order_id: Uuid) -> Result<(), String> {
    // Placement bookkeeping beyond persistence (e.g. back-office sync) hangs
    // off this handler.
    info!("Processing order placed event for order {}", order_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_delivers_event_to_receiver() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);

        let order_id = Uuid::new_v4();
        sender.send(Event::OrderPlaced(order_id)).await.unwrap();

        match rx.recv().await {
            Some(Event::OrderPlaced(received)) => assert_eq!(received, order_id),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn send_or_log_swallows_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);

        // Must not panic or error out
        sender.send_or_log(Event::SettingsUpdated).await;
    }
}
