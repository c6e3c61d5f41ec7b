use async_trait::async_trait;
use redis::RedisResult;
use tracing::info;
use uuid::Uuid;

use transit_core::{
    InventoryError, ScheduleStatus, SeatInventory, SeatOperation, SeatStore, StoreError,
};

// Redis runs a script to completion before serving anything else, so the
// read-check-write below is atomic across every process sharing the server.
const APPLY_SCRIPT: &str = r#"
    local key = KEYS[1]
    if redis.call("EXISTS", key) == 0 then
        return {"missing"}
    end
    local fields = redis.call("HMGET", key, "total", "available", "booked", "status", "version")
    local total = tonumber(fields[1])
    local available = tonumber(fields[2])
    local booked = tonumber(fields[3])
    local status = fields[4]
    local version = tonumber(fields[5])

    local op = ARGV[1]
    if op == "reserve" then
        local n = tonumber(ARGV[2])
        if status ~= "scheduled" then
            return {"not_bookable", status}
        end
        if available < n then
            return {"insufficient", tostring(n), tostring(available)}
        end
        available = available - n
        booked = booked + n
    elseif op == "release" then
        local n = tonumber(ARGV[2])
        if booked < n then
            return {"exceeds_booked", tostring(n), tostring(booked)}
        end
        available = available + n
        booked = booked - n
    elseif op == "set_status" then
        status = ARGV[2]
    else
        return {"unknown_op", op}
    end

    version = version + 1
    redis.call("HSET", key, "available", available, "booked", booked, "status", status, "version", version)
    return {"ok", tostring(total), tostring(available), tostring(booked), status, tostring(version)}
"#;

const CREATE_SCRIPT: &str = r#"
    if redis.call("EXISTS", KEYS[1]) == 1 then
        return 0
    end
    redis.call("HSET", KEYS[1], "total", ARGV[1], "available", ARGV[2], "booked", ARGV[3], "status", ARGV[4], "version", ARGV[5])
    return 1
"#;

/// Seat counters kept as a Redis hash per schedule.
#[derive(Clone)]
pub struct RedisSeatStore {
    client: redis::Client,
    apply_script: redis::Script,
    create_script: redis::Script,
}

impl RedisSeatStore {
    pub fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self {
            client,
            apply_script: redis::Script::new(APPLY_SCRIPT),
            create_script: redis::Script::new(CREATE_SCRIPT),
        })
    }

    async fn invoke_apply(&self, schedule_id: Uuid, operation: SeatOperation) -> RedisResult<Vec<String>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let (op, value) = script_args(&operation);
        self.apply_script
            .key(seats_key(schedule_id))
            .arg(op)
            .arg(value)
            .invoke_async(&mut conn)
            .await
    }
}

fn redis_error(err: redis::RedisError) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn seats_key(schedule_id: Uuid) -> String {
    format!("schedule:{}:seats", schedule_id)
}

fn script_args(operation: &SeatOperation) -> (&'static str, String) {
    match operation {
        SeatOperation::Reserve(n) => ("reserve", n.to_string()),
        SeatOperation::Release(n) => ("release", n.to_string()),
        SeatOperation::SetStatus(status) => ("set_status", status.as_str().to_string()),
    }
}

fn number<T: std::str::FromStr>(raw: Option<&String>) -> Result<T, StoreError> {
    raw.and_then(|s| s.parse().ok())
        .ok_or_else(|| StoreError::Backend(format!("malformed script reply field: {:?}", raw)))
}

fn status(raw: Option<&String>) -> Result<ScheduleStatus, StoreError> {
    raw.ok_or_else(|| StoreError::Backend("missing status in script reply".to_string()))?
        .parse()
        .map_err(|e: transit_core::CoreError| StoreError::Backend(e.to_string()))
}

/// Turn the apply script's reply into a snapshot or the rejection it encodes.
fn parse_apply_reply(schedule_id: Uuid, reply: &[String]) -> Result<SeatInventory, StoreError> {
    match reply.first().map(String::as_str) {
        Some("ok") => Ok(SeatInventory {
            schedule_id,
            total_capacity: number(reply.get(1))?,
            available: number(reply.get(2))?,
            booked: number(reply.get(3))?,
            status: status(reply.get(4))?,
            version: number(reply.get(5))?,
        }),
        Some("missing") => Err(StoreError::NotFound(schedule_id)),
        Some("not_bookable") => Err(InventoryError::ScheduleNotBookable {
            schedule_id,
            status: status(reply.get(1))?,
        }
        .into()),
        Some("insufficient") => Err(InventoryError::InsufficientCapacity {
            schedule_id,
            requested: number(reply.get(1))?,
            available: number(reply.get(2))?,
        }
        .into()),
        Some("exceeds_booked") => Err(InventoryError::ReleaseExceedsBooked {
            schedule_id,
            requested: number(reply.get(1))?,
            booked: number(reply.get(2))?,
        }
        .into()),
        other => Err(StoreError::Backend(format!("unexpected script reply: {:?}", other))),
    }
}

#[async_trait]
impl SeatStore for RedisSeatStore {
    async fn create(&self, inventory: &SeatInventory) -> Result<(), StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(redis_error)?;
        let created: i64 = self
            .create_script
            .key(seats_key(inventory.schedule_id))
            .arg(inventory.total_capacity)
            .arg(inventory.available)
            .arg(inventory.booked)
            .arg(inventory.status.as_str())
            .arg(inventory.version)
            .invoke_async(&mut conn)
            .await
            .map_err(redis_error)?;

        if created == 0 {
            return Err(StoreError::AlreadyExists(inventory.schedule_id));
        }
        info!("Seat counters created in Redis for schedule {}", inventory.schedule_id);
        Ok(())
    }

    async fn snapshot(&self, schedule_id: Uuid) -> Result<Option<SeatInventory>, StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(redis_error)?;
        // One HMGET is a single command, so the fields come from the same instant.
        let fields: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(seats_key(schedule_id))
            .arg("total")
            .arg("available")
            .arg("booked")
            .arg("status")
            .arg("version")
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;

        if fields.iter().all(Option::is_none) {
            return Ok(None);
        }

        let mut reply = vec!["ok".to_string()];
        reply.extend(fields.into_iter().map(Option::unwrap_or_default));
        parse_apply_reply(schedule_id, &reply).map(Some)
    }

    async fn apply(
        &self,
        schedule_id: Uuid,
        operation: SeatOperation,
    ) -> Result<SeatInventory, StoreError> {
        // Same guard as SeatOperation::apply_to; the script does not re-check it.
        if let SeatOperation::Reserve(0) | SeatOperation::Release(0) = operation {
            return Err(InventoryError::InvalidPassengerCount(0).into());
        }

        let reply = self
            .invoke_apply(schedule_id, operation)
            .await
            .map_err(redis_error)?;
        parse_apply_reply(schedule_id, &reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_ok_reply_becomes_snapshot() {
        let id = Uuid::new_v4();
        let inv = parse_apply_reply(id, &strings(&["ok", "50", "48", "2", "scheduled", "7"])).unwrap();
        assert_eq!(inv.schedule_id, id);
        assert_eq!(inv.available, 48);
        assert_eq!(inv.booked, 2);
        assert_eq!(inv.version, 7);
        assert!(inv.is_consistent());
    }

    #[test]
    fn test_rejections_map_to_inventory_errors() {
        let id = Uuid::new_v4();
        assert!(matches!(
            parse_apply_reply(id, &strings(&["insufficient", "3", "1"])),
            Err(StoreError::Rejected(InventoryError::InsufficientCapacity { requested: 3, available: 1, .. }))
        ));
        assert!(matches!(
            parse_apply_reply(id, &strings(&["not_bookable", "cancelled"])),
            Err(StoreError::Rejected(InventoryError::ScheduleNotBookable { status: ScheduleStatus::Cancelled, .. }))
        ));
        assert!(matches!(
            parse_apply_reply(id, &strings(&["exceeds_booked", "5", "2"])),
            Err(StoreError::Rejected(InventoryError::ReleaseExceedsBooked { requested: 5, booked: 2, .. }))
        ));
        assert!(matches!(
            parse_apply_reply(id, &strings(&["missing"])),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_garbage_reply_is_backend_error() {
        let id = Uuid::new_v4();
        assert!(matches!(
            parse_apply_reply(id, &strings(&["ok", "fifty"])),
            Err(StoreError::Backend(_))
        ));
        assert!(matches!(parse_apply_reply(id, &[]), Err(StoreError::Backend(_))));
    }

    #[test]
    fn test_script_args() {
        assert_eq!(script_args(&SeatOperation::Reserve(4)), ("reserve", "4".to_string()));
        assert_eq!(
            script_args(&SeatOperation::SetStatus(ScheduleStatus::Delayed)),
            ("set_status", "delayed".to_string())
        );
        assert_eq!(seats_key(Uuid::nil()), "schedule:00000000-0000-0000-0000-000000000000:seats");
    }
}
