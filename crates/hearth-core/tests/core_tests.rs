#[cfg(test)]
mod tests {
    use hearth_core::*;

    // ── Error tests ────────────────────────────────────────────

    #[test]
    fn test_error_display_names_module() {
        let err = HearthError::InitializationFailed {
            module: "Foo".into(),
            kind: FailureKind::Timeout,
            reason: "exceeded 5000ms".into(),
        };
        let s = err.to_string();
        assert!(s.contains("Foo"));
        assert!(s.contains("TIMEOUT"));
    }

    #[test]
    fn test_error_kinds_are_stable() {
        assert_eq!(
            HearthError::DuplicateModule("Foo".into()).kind(),
            "DuplicateModule"
        );
        assert_eq!(
            HearthError::InitializationFailed {
                module: "Foo".into(),
                kind: FailureKind::Exception,
                reason: String::new(),
            }
            .kind(),
            "InitializationFailed(Exception)"
        );
        assert_eq!(HearthError::ModuleDisabled("Foo".into()).kind(), "Skipped");
    }

    #[test]
    fn test_non_fatal_kinds() {
        let disable = HearthError::DisableFailed {
            module: "Foo".into(),
            reason: "boom".into(),
        };
        let close = HearthError::LoaderCloseFailed {
            module: "Foo".into(),
            reason: "already closed".into(),
        };
        assert!(!disable.is_fatal());
        assert!(!close.is_fatal());
        assert!(HearthError::NotLoaded("Foo".into()).is_fatal());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err: HearthError = io_err.into();
        assert_eq!(err.kind(), "Io");
        assert!(err.to_string().contains("file missing"));
    }

    #[test]
    fn test_failure_kind_serde() {
        let json = serde_json::to_string(&FailureKind::Timeout).unwrap();
        assert_eq!(json, "\"TIMEOUT\"");
    }

    // ── Event tests ────────────────────────────────────────────

    #[test]
    fn test_event_serde_tag_matches_kind() {
        let event = Event::ModulesReloaded { module_count: 3 };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], event.kind());
        assert_eq!(json["module_count"], 3);
    }

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.publish(Event::ModuleUnloaded {
            module: "Foo".into(),
        });
        match rx.recv().await.unwrap() {
            Event::ModuleUnloaded { module } => assert_eq!(module, "Foo"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_event_bus_publish_without_subscribers() {
        let bus = EventBus::default();
        bus.publish(Event::Shutdown);
    }

    // ── Path tests ─────────────────────────────────────────────

    #[test]
    fn test_module_paths_are_namespaced() {
        let paths = ModulePaths::new(std::path::Path::new("/srv/data"), "Foo");
        assert_eq!(paths.root, std::path::Path::new("/srv/data/Foo"));
        assert_eq!(paths.config, std::path::Path::new("/srv/data/Foo/config.toml"));
        assert!(paths.data.ends_with("Foo/data"));
        assert!(paths.resources.ends_with("Foo/resources"));
    }

    // ── Legacy shapes ──────────────────────────────────────────

    #[test]
    fn test_method_shape_equality() {
        let a = MethodShape::new("initialize", &[ParamKind::Api, ParamKind::Config]);
        let b = MethodShape::new("initialize", &[ParamKind::Api, ParamKind::Config]);
        let c = MethodShape::new("initialize", &[ParamKind::Api]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
