//! Task name to queue name routing. Pure, no I/O, no failure modes.

use std::collections::HashMap;

use crate::types::QueueName;

pub trait Router: Send + Sync {
    fn get_queue(&self, task_name: &str) -> QueueName;

    fn applied_conf(&self) -> Vec<(&'static str, String)> {
        Vec::new()
    }
}

pub struct DefaultRouter {
    task_routes: HashMap<String, QueueName>,
    default_queue: QueueName,
}

impl DefaultRouter {
    pub fn new(task_routes: HashMap<String, QueueName>, default_queue: QueueName) -> Self {
        Self {
            task_routes,
            default_queue,
        }
    }
}

impl Default for DefaultRouter {
    fn default() -> Self {
        Self::new(HashMap::new(), "default".to_string())
    }
}

impl Router for DefaultRouter {
    fn get_queue(&self, task_name: &str) -> QueueName {
        self.task_routes
            .get(task_name)
            .cloned()
            .unwrap_or_else(|| self.default_queue.clone())
    }

    fn applied_conf(&self) -> Vec<(&'static str, String)> {
        vec![("default_queue", self.default_queue.clone())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_default_queue() {
        let router = DefaultRouter::default();
        assert_eq!(router.get_queue("anything"), "default");
    }

    #[test]
    fn honors_explicit_override() {
        let mut routes = HashMap::new();
        routes.insert("t.report".to_string(), "reports".to_string());
        let router = DefaultRouter::new(routes, "default".to_string());
        assert_eq!(router.get_queue("t.report"), "reports");
        assert_eq!(router.get_queue("t.other"), "default");
    }
}
