//! Canonical structured event names used across `ring-pubsub`.

// Publish router events.
pub const PUBLISH_RECEIVED: &str = "publish_received";
pub const PUBLISH_REJECTED_CLOSING: &str = "publish_rejected_closing";
pub const PUBLISH_DELIVERY_FAILED: &str = "publish_delivery_failed";
pub const REPLICATION_SEND: &str = "replication_send";
pub const REPLICATION_OK: &str = "replication_ok";
pub const REPLICATION_FAILED: &str = "replication_failed";
pub const REPLICATION_SKIPPED: &str = "replication_skipped";

// Subscribe router events.
pub const SUBSCRIBE_RECEIVED: &str = "subscribe_received";
pub const SUBSCRIBE_NO_STREAM: &str = "subscribe_no_stream";
pub const SUBSCRIBE_REJECTED_CLOSING: &str = "subscribe_rejected_closing";
pub const SUBSCRIBE_NOT_ALLOCATED: &str = "subscribe_not_allocated";
pub const SUBSCRIBE_REGISTERED: &str = "subscribe_registered";
pub const SUBSCRIPTION_MOVED: &str = "subscription_moved";
pub const SUBSCRIPTION_PROMOTED: &str = "subscription_promoted";
pub const SUBSCRIPTION_DEMOTED: &str = "subscription_demoted";
pub const SUBSCRIPTION_REPLICA_CHANGED: &str = "subscription_replica_changed";
pub const SUBSCRIPTION_STREAM_CLOSED: &str = "subscription_stream_closed";

// Subscription listener events.
pub const LISTENER_DROP_DUPLICATE: &str = "listener_drop_duplicate";
pub const LISTENER_DROP_NOT_ALLOCATED: &str = "listener_drop_not_allocated";
pub const LISTENER_DROP_STANDBY: &str = "listener_drop_standby";
pub const LISTENER_WRITE: &str = "listener_write";
pub const LISTENER_WRITE_FAILED: &str = "listener_write_failed";

// Receiver events.
pub const RECEIVER_CREATE: &str = "receiver_create";
pub const RECEIVER_REUSE: &str = "receiver_reuse";
pub const RECEIVER_SUBSCRIBE_START: &str = "receiver_subscribe_start";
pub const RECEIVER_SUBSCRIBE_OK: &str = "receiver_subscribe_ok";
pub const RECEIVER_SUBSCRIBE_FAILED: &str = "receiver_subscribe_failed";
pub const RECEIVER_LOCAL: &str = "receiver_local";
pub const RECEIVER_STREAM_CLOSED: &str = "receiver_stream_closed";
pub const RECEIVER_RESUBSCRIBE: &str = "receiver_resubscribe";
pub const RECEIVER_RESUBSCRIBE_ABANDONED: &str = "receiver_resubscribe_abandoned";
pub const RECEIVER_STANDBY_LINK: &str = "receiver_standby_link";
pub const RECEIVER_DELIVER_FAILED: &str = "receiver_deliver_failed";
pub const RECEIVER_DESTROY: &str = "receiver_destroy";

// Lifecycle events.
pub const INSTANCE_READY: &str = "instance_ready";
pub const INSTANCE_CLOSE_START: &str = "instance_close_start";
pub const INSTANCE_CLOSE_OK: &str = "instance_close_ok";
pub const LOCAL_BUS_EMIT_REJECTED: &str = "local_bus_emit_rejected";
