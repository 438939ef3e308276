use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Result type for task handlers
pub type TaskResult = Result<Vec<u8>, String>;

/// Trait for task handlers
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Execute the task with the given payload
    async fn execute(&self, payload: Vec<u8>) -> TaskResult;
}

/// Registry of task handlers by task type
#[derive(Clone)]
pub struct TaskHandlerRegistry {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn TaskHandler>>>>,
}

impl TaskHandlerRegistry {
    pub fn new() -> Self {
        TaskHandlerRegistry {
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Registry preloaded with `echo`, `sleep`, `json` and `fail`
    pub fn with_builtin_handlers() -> Self {
        let registry = Self::new();
        registry.register("echo", EchoHandler);
        registry.register("sleep", SleepHandler::new(1000));
        registry.register("json", JsonProcessorHandler);
        registry.register("fail", FailHandler);
        registry
    }

    /// Register a task handler for a specific task type
    pub fn register<H: TaskHandler + 'static>(&self, task_type: impl Into<String>, handler: H) {
        let mut handlers = self.handlers.write();
        handlers.insert(task_type.into(), Arc::new(handler));
    }

    /// Get a handler for a task type
    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        let handlers = self.handlers.read();
        handlers.get(task_type).cloned()
    }

    pub fn has_handler(&self, task_type: &str) -> bool {
        let handlers = self.handlers.read();
        handlers.contains_key(task_type)
    }

    /// Get all registered task types, sorted
    pub fn task_types(&self) -> Vec<String> {
        let handlers = self.handlers.read();
        let mut types: Vec<String> = handlers.keys().cloned().collect();
        types.sort();
        types
    }
}

impl Default for TaskHandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Echoes the payload back
pub struct EchoHandler;

#[async_trait]
impl TaskHandler for EchoHandler {
    async fn execute(&self, payload: Vec<u8>) -> TaskResult {
        Ok(payload)
    }
}

/// Simulates work by sleeping, then echoes the payload.
///
/// A payload holding a decimal number of milliseconds overrides the
/// configured duration.
pub struct SleepHandler {
    duration_ms: u64,
}

impl SleepHandler {
    pub fn new(duration_ms: u64) -> Self {
        SleepHandler { duration_ms }
    }

    fn duration_for(&self, payload: &[u8]) -> Duration {
        let ms = std::str::from_utf8(payload)
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(self.duration_ms);
        Duration::from_millis(ms)
    }
}

#[async_trait]
impl TaskHandler for SleepHandler {
    async fn execute(&self, payload: Vec<u8>) -> TaskResult {
        tokio::time::sleep(self.duration_for(&payload)).await;
        Ok(payload)
    }
}

/// Parses a JSON payload and reports on its shape
pub struct JsonProcessorHandler;

#[async_trait]
impl TaskHandler for JsonProcessorHandler {
    async fn execute(&self, payload: Vec<u8>) -> TaskResult {
        let json: serde_json::Value =
            serde_json::from_slice(&payload).map_err(|e| format!("Invalid JSON: {}", e))?;

        let result = if let Some(obj) = json.as_object() {
            serde_json::json!({
                "key_count": obj.len(),
                "original": json,
            })
        } else {
            serde_json::json!({
                "original": json,
            })
        };

        serde_json::to_vec(&result).map_err(|e| format!("Failed to serialize result: {}", e))
    }
}

/// Always fails, with the payload as the error message
pub struct FailHandler;

#[async_trait]
impl TaskHandler for FailHandler {
    async fn execute(&self, payload: Vec<u8>) -> TaskResult {
        Err(String::from_utf8_lossy(&payload).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_handler() {
        let handler = EchoHandler;
        let payload = b"test data".to_vec();
        let result = handler.execute(payload.clone()).await.unwrap();
        assert_eq!(result, payload);
    }

    #[tokio::test]
    async fn test_registry() {
        let registry = TaskHandlerRegistry::new();
        registry.register("echo", EchoHandler);

        assert!(registry.has_handler("echo"));
        assert!(!registry.has_handler("unknown"));

        let handler = registry.get("echo").unwrap();
        let result = handler.execute(b"test".to_vec()).await.unwrap();
        assert_eq!(result, b"test");
    }

    #[test]
    fn test_builtin_handlers() {
        let registry = TaskHandlerRegistry::with_builtin_handlers();
        assert_eq!(registry.task_types(), vec!["echo", "fail", "json", "sleep"]);
    }

    #[test]
    fn test_sleep_duration_from_payload() {
        let handler = SleepHandler::new(1000);
        assert_eq!(handler.duration_for(b"25"), Duration::from_millis(25));
        assert_eq!(handler.duration_for(b"not a number"), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_json_handler() {
        let result = JsonProcessorHandler
            .execute(br#"{"a": 1, "b": 2}"#.to_vec())
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&result).unwrap();
        assert_eq!(value["key_count"], 2);

        assert!(JsonProcessorHandler.execute(b"{".to_vec()).await.is_err());
    }

    #[tokio::test]
    async fn test_fail_handler() {
        let err = FailHandler.execute(b"bad input".to_vec()).await.unwrap_err();
        assert_eq!(err, "bad input");
    }
}
