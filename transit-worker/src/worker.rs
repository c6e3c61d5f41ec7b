use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use transit_core::{BookingRepository, InventoryEvent, SeatStore};
use transit_inventory::{
    BookingWorkflow, PendingBookingSweeper, PricingRules, RetryPolicy, SeatInventoryManager,
};
use transit_store::app_config::{BusinessRules, Config, SeatBackend};
use transit_store::{
    DbClient, InMemoryBookingRepository, InMemorySeatStore, PgBookingRepository, PgSeatStore,
    RedisSeatStore,
};

pub struct Services {
    pub workflow: Arc<BookingWorkflow>,
    pub sweeper: Option<PendingBookingSweeper>,
    pub sweep_interval: Duration,
}

/// Connect storage for the configured backend and wire the booking services on top.
pub async fn build_services(config: &Config) -> anyhow::Result<Services> {
    let inventory_cfg = &config.inventory;

    let (store, bookings, rules): (Arc<dyn SeatStore>, Arc<dyn BookingRepository>, BusinessRules) =
        match inventory_cfg.backend {
            SeatBackend::Memory => {
                info!("Using in-memory seat store and booking repository");
                let store: Arc<dyn SeatStore> =
                    Arc::new(InMemorySeatStore::new(inventory_cfg.lock_timeout()));
                let bookings: Arc<dyn BookingRepository> = Arc::new(InMemoryBookingRepository::new());
                (store, bookings, config.business_rules.clone())
            }
            backend => {
                let db = DbClient::new(&config.database.url, config.database.max_connections)
                    .await
                    .context("Failed to connect to PostgreSQL")?;
                db.migrate().await.context("Failed to run migrations")?;
                let rules = db
                    .fetch_business_rules(config.business_rules.clone())
                    .await
                    .context("Failed to load business rules")?;

                let store: Arc<dyn SeatStore> = if backend == SeatBackend::Redis {
                    info!("Using Redis seat store at {}", config.redis.url);
                    Arc::new(
                        RedisSeatStore::new(&config.redis.url)
                            .context("Failed to create Redis client")?,
                    )
                } else {
                    info!("Using PostgreSQL seat store");
                    Arc::new(PgSeatStore::new(db.pool.clone(), inventory_cfg.lock_timeout()))
                };
                let bookings: Arc<dyn BookingRepository> =
                    Arc::new(PgBookingRepository::new(db.pool.clone()));
                (store, bookings, rules)
            }
        };

    let inventory = Arc::new(SeatInventoryManager::new(
        store,
        RetryPolicy {
            max_attempts: inventory_cfg.max_attempts,
            backoff: inventory_cfg.retry_backoff(),
        },
    ));

    let workflow = Arc::new(BookingWorkflow::new(
        inventory,
        bookings.clone(),
        PricingRules {
            tax_rate: rules.tax_rate,
            booking_fee: rules.booking_fee,
            currency: rules.currency.clone(),
        },
    ));

    let sweeper = if rules.pending_hold_seconds == 0 {
        info!("Pending hold expiry disabled");
        None
    } else {
        Some(PendingBookingSweeper::new(
            workflow.clone(),
            bookings,
            Duration::from_secs(rules.pending_hold_seconds),
            config.worker.sweep_batch_size,
        ))
    };

    Ok(Services {
        workflow,
        sweeper,
        sweep_interval: Duration::from_secs(config.worker.sweep_interval_seconds.max(1)),
    })
}

/// Log every committed seat change until shutdown.
pub async fn log_inventory_events(
    mut events: broadcast::Receiver<InventoryEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => {
                    let snapshot = event.snapshot();
                    debug!(
                        "Schedule {}: {} available, {} booked (v{})",
                        event.schedule_id(),
                        snapshot.available,
                        snapshot.booked,
                        snapshot.version
                    );
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Inventory event log lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transit_store::app_config::{DatabaseConfig, InventoryConfig, RedisConfig, WorkerConfig};
    use uuid::Uuid;

    fn memory_config(pending_hold_seconds: u64) -> Config {
        Config {
            database: DatabaseConfig {
                url: "postgres://unused".to_string(),
                max_connections: 1,
            },
            redis: RedisConfig {
                url: "redis://unused".to_string(),
            },
            inventory: InventoryConfig {
                backend: SeatBackend::Memory,
                max_attempts: 3,
                retry_backoff_ms: 5,
                lock_timeout_ms: 500,
            },
            business_rules: BusinessRules {
                tax_rate: 0.1,
                booking_fee: 100,
                currency: "EUR".to_string(),
                pending_hold_seconds,
            },
            worker: WorkerConfig {
                sweep_interval_seconds: 0,
                sweep_batch_size: 10,
            },
        }
    }

    #[tokio::test]
    async fn test_memory_backend_needs_no_servers() {
        let services = build_services(&memory_config(900)).await.unwrap();
        assert!(services.sweeper.is_some());
        assert_eq!(services.sweep_interval, Duration::from_secs(1));

        let schedule_id = Uuid::new_v4();
        let inv = services
            .workflow
            .inventory()
            .register_schedule(schedule_id, 3)
            .await
            .unwrap();
        assert_eq!(inv.available, 3);
    }

    #[tokio::test]
    async fn test_zero_hold_disables_sweeper() {
        let services = build_services(&memory_config(0)).await.unwrap();
        assert!(services.sweeper.is_none());
    }

    #[tokio::test]
    async fn test_event_log_stops_on_shutdown() {
        let (events_tx, events_rx) = broadcast::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(log_inventory_events(events_rx, shutdown_rx));

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
        drop(events_tx);
    }
}
