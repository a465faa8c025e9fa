//! Port resolution rules

use crate::directory::Port;

/// Preferred port if present, else the first available port, else none
pub fn resolve_with_fallback(ports: &[Port], preferred: Option<&str>) -> Option<Port> {
    preferred
        .and_then(|id| ports.iter().find(|p| p.id == id))
        .or_else(|| ports.first())
        .cloned()
}

/// Exactly the requested port, or none if it isn't present
pub fn resolve_exact(ports: &[Port], id: Option<&str>) -> Option<Port> {
    let id = id?;
    ports.iter().find(|p| p.id == id).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::Direction;

    fn outputs() -> Vec<Port> {
        vec![
            Port::new("o1", "SynthB", Direction::Output),
            Port::new("o2", "SynthC", Direction::Output),
        ]
    }

    #[test]
    fn test_preference_wins() {
        let port = resolve_with_fallback(&outputs(), Some("o2")).unwrap();
        assert_eq!(port.id, "o2");
    }

    #[test]
    fn test_missing_preference_falls_back_to_first() {
        let port = resolve_with_fallback(&outputs(), Some("gone")).unwrap();
        assert_eq!(port.id, "o1");

        let port = resolve_with_fallback(&outputs(), None).unwrap();
        assert_eq!(port.id, "o1");
    }

    #[test]
    fn test_no_ports_resolves_to_none() {
        assert!(resolve_with_fallback(&[], Some("o1")).is_none());
    }

    #[test]
    fn test_exact_resolution() {
        assert_eq!(resolve_exact(&outputs(), Some("o2")).unwrap().id, "o2");
        assert!(resolve_exact(&outputs(), Some("gone")).is_none());
        assert!(resolve_exact(&outputs(), None).is_none());
    }
}
