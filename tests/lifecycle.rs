//! Integration tests for context lifecycle, sharing policy, and teardown
//! ordering.
//!
//! The registry is process-wide, so assertions stay scoped to the contexts
//! each test creates; global counts would race with parallel tests.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;

use polyctx::{
    Context, ContextConfig, ContextError, ContextKind, HostEnvironment, LifecycleState,
    MemoryHostEnvironment, PrimitiveDispatchMode, StartupPolicy, StaticRuntimeBindings,
    registry,
};

fn setup() -> Arc<MemoryHostEnvironment> {
    let _ = env_logger::builder().is_test(true).try_init();
    polyctx::try_initialize_process(StaticRuntimeBindings::minimal());
    MemoryHostEnvironment::new(vec![])
}

#[test]
fn create_then_destroy_runs_the_full_lifecycle() {
    let host = setup();
    let ctx = Context::create(Some(ContextConfig::exclusive()), host).unwrap();
    assert_eq!(ctx.lifecycle_state(), LifecycleState::Active);
    assert!(registry::is_registered(ctx.id()));
    assert_eq!(ctx.kind(), ContextKind::Exclusive);

    ctx.destroy().unwrap();
    assert_eq!(ctx.lifecycle_state(), LifecycleState::Destroyed);
    assert!(!registry::is_registered(ctx.id()));
}

#[test]
fn operations_after_destroy_report_already_destroyed() {
    let host = setup();
    let ctx = Context::create(Some(ContextConfig::exclusive()), host).unwrap();
    ctx.destroy().unwrap();

    let expected = ContextError::AlreadyDestroyed { id: ctx.id().raw() };
    assert_eq!(ctx.destroy(), Err(expected.clone()));
    assert_eq!(ctx.state().err(), Some(expected.clone()));
    assert_eq!(ctx.complete_initialization(), Err(expected));
}

#[test]
fn teardown_hooks_run_in_construction_order_not_reversed() {
    let host = setup();
    let ctx = Context::create(Some(ContextConfig::exclusive()), host).unwrap();

    let construction = ctx.state().unwrap().construction_order();
    assert!(construction.len() >= 3);
    assert_eq!(
        construction,
        vec![
            "env_vars",
            "options",
            "profile",
            "environments",
            "error_handling",
            "connections",
            "std_connections",
            "rng",
            "serialization",
            "lazy_code_cache",
        ]
    );

    ctx.destroy().unwrap();
    assert_eq!(ctx.teardown_order(), construction);
}

#[test]
fn second_shared_write_child_is_rejected_and_registry_unchanged() {
    let host = setup();
    let parent = Context::create(Some(ContextConfig::exclusive()), host.clone()).unwrap();
    let first =
        Context::create(Some(ContextConfig::shared_write(parent.id())), host.clone()).unwrap();
    assert_eq!(parent.shared_child(), Some(first.id()));

    let rejected = Context::create(Some(ContextConfig::shared_write(parent.id())), host.clone());
    assert_eq!(rejected.err(), Some(ContextError::SharedWriteChildExists));
    assert_eq!(parent.shared_child(), Some(first.id()));

    // Destroying the live child releases the slot for a successor.
    first.destroy().unwrap();
    assert_eq!(parent.shared_child(), None);
    let second = Context::create(Some(ContextConfig::shared_write(parent.id())), host).unwrap();
    assert_eq!(parent.shared_child(), Some(second.id()));

    second.destroy().unwrap();
    parent.destroy().unwrap();
}

#[test]
fn shared_write_requires_parent_and_rejects_shared_write_parent() {
    let host = setup();
    let no_parent = Context::create(
        Some(ContextConfig {
            kind: ContextKind::SharedWrite,
            parent: None,
            ..ContextConfig::exclusive()
        }),
        host.clone(),
    );
    assert_eq!(
        no_parent.err(),
        Some(ContextError::ParentRequired {
            kind: ContextKind::SharedWrite
        })
    );

    let root = Context::create(Some(ContextConfig::exclusive()), host.clone()).unwrap();
    let child =
        Context::create(Some(ContextConfig::shared_write(root.id())), host.clone()).unwrap();
    let stacked = Context::create(Some(ContextConfig::shared_write(child.id())), host);
    assert_eq!(
        stacked.err(),
        Some(ContextError::InvalidParentKind {
            kind: ContextKind::SharedWrite,
            parent_kind: ContextKind::SharedWrite,
        })
    );

    child.destroy().unwrap();
    root.destroy().unwrap();
}

#[test]
fn shared_write_child_writes_into_the_parent_namespace() {
    let host = setup();
    let parent = Context::create(Some(ContextConfig::exclusive()), host.clone()).unwrap();
    parent
        .state()
        .unwrap()
        .environments
        .set("base", json!("loaded"));

    let child =
        Context::create(Some(ContextConfig::shared_write(parent.id())), host).unwrap();
    let child_env = &child.state().unwrap().environments;
    assert_eq!(child_env.get("base"), Some(json!("loaded")));

    child_env.set("pkg", json!("attached"));
    assert_eq!(
        parent.state().unwrap().environments.get("pkg"),
        Some(json!("attached"))
    );

    child.destroy().unwrap();
    parent.destroy().unwrap();
}

#[test]
fn read_copy_child_gets_an_isolated_snapshot() {
    let host = setup();
    let parent = Context::create(Some(ContextConfig::exclusive()), host.clone()).unwrap();
    parent.state().unwrap().environments.set("x", json!(1));

    let child =
        Context::create(Some(ContextConfig::shared_read_copy(parent.id())), host).unwrap();
    let child_env = &child.state().unwrap().environments;
    assert_eq!(child_env.get("x"), Some(json!(1)));

    child_env.set("child_only", json!(true));
    parent.state().unwrap().environments.set("parent_only", json!(true));
    assert_eq!(parent.state().unwrap().environments.get("child_only"), None);
    assert_eq!(child_env.get("parent_only"), None);

    child.destroy().unwrap();
    parent.destroy().unwrap();
}

#[test]
fn exclusive_child_duplicates_primitive_dispatch_metadata() {
    let host = setup();
    let parent = Context::create(Some(ContextConfig::exclusive()), host.clone()).unwrap();
    parent.with_primitive_dispatch(|info| {
        info.set_mode("sum", PrimitiveDispatchMode::HasMethods);
    });

    let child =
        Context::create(Some(ContextConfig::exclusive_child(parent.id())), host).unwrap();
    assert!(child.has_own_primitive_dispatch());
    assert_eq!(
        child.with_primitive_dispatch(|info| info.mode("sum")),
        PrimitiveDispatchMode::HasMethods
    );

    // The copy diverges independently of the parent.
    child.with_primitive_dispatch(|info| {
        info.set_mode("sum", PrimitiveDispatchMode::Suppressed);
    });
    assert_eq!(
        parent.with_primitive_dispatch(|info| info.mode("sum")),
        PrimitiveDispatchMode::HasMethods
    );

    child.destroy().unwrap();
    parent.destroy().unwrap();
}

#[test]
fn shared_kinds_resolve_dispatch_metadata_through_the_parent() {
    let host = setup();
    let parent = Context::create(Some(ContextConfig::exclusive()), host.clone()).unwrap();
    let child =
        Context::create(Some(ContextConfig::shared_read_copy(parent.id())), host).unwrap();
    assert!(!child.has_own_primitive_dispatch());

    child.with_primitive_dispatch(|info| {
        info.set_mode("length", PrimitiveDispatchMode::NeedsReset);
    });
    assert_eq!(
        parent.with_primitive_dispatch(|info| info.mode("length")),
        PrimitiveDispatchMode::NeedsReset
    );

    child.destroy().unwrap();
    parent.destroy().unwrap();
}

#[test]
fn shared_write_child_inherits_the_method_dispatch_flag() {
    let host = setup();
    let parent = Context::create(Some(ContextConfig::exclusive()), host.clone()).unwrap();
    parent.set_method_table_dispatch(true);

    let child =
        Context::create(Some(ContextConfig::shared_write(parent.id())), host).unwrap();
    assert!(child.is_method_table_dispatch_on());

    child.destroy().unwrap();
    parent.destroy().unwrap();
}

#[test]
fn destroying_a_child_rebinds_the_thread_to_the_parent() {
    let host = setup();
    let parent = Context::create(Some(ContextConfig::exclusive()), host.clone()).unwrap();
    let child =
        Context::create(Some(ContextConfig::exclusive_child(parent.id())), host).unwrap();

    // Creating the child rebound this thread; two contexts exist so lookups
    // go through the per-thread slot.
    assert_eq!(polyctx::current().id(), child.id());

    child.destroy().unwrap();
    assert_eq!(polyctx::current().id(), parent.id());

    parent.destroy().unwrap();
    assert!(!registry::is_bound());
}

#[test]
fn with_context_guard_restores_the_previous_binding() {
    let host = setup();
    let first = Context::create(Some(ContextConfig::exclusive()), host.clone()).unwrap();
    let second = Context::create(Some(ContextConfig::exclusive()), host).unwrap();
    assert_eq!(polyctx::current().id(), second.id());

    {
        let _guard = polyctx::with_context(&first);
        assert_eq!(polyctx::current().id(), first.id());
    }
    assert_eq!(polyctx::current().id(), second.id());

    second.destroy().unwrap();
    first.destroy().unwrap();
}

#[test]
fn deferred_startup_builds_the_environment_trio_later() {
    let host = setup();
    let ctx = Context::create(
        Some(ContextConfig::exclusive().with_startup(StartupPolicy::Deferred)),
        host,
    )
    .unwrap();
    assert!(!ctx.is_fully_initialized());
    assert!(ctx.state().unwrap().env_vars().is_none());
    assert!(ctx.state().unwrap().options().is_none());
    assert_eq!(
        ctx.state().unwrap().construction_order().first().copied(),
        Some("environments")
    );

    ctx.complete_initialization().unwrap();
    assert!(ctx.is_fully_initialized());
    assert!(ctx.state().unwrap().env_vars().is_some());
    assert!(ctx.state().unwrap().options().is_some());

    assert_eq!(
        ctx.complete_initialization(),
        Err(ContextError::AlreadyInitialized { id: ctx.id().raw() })
    );

    ctx.destroy().unwrap();
}

#[test]
fn full_startup_rejects_complete_initialization() {
    let host = setup();
    let ctx = Context::create(Some(ContextConfig::exclusive()), host).unwrap();
    assert_eq!(
        ctx.complete_initialization(),
        Err(ContextError::NotDeferred { id: ctx.id().raw() })
    );
    ctx.destroy().unwrap();
}

#[test]
fn option_overrides_are_read_from_the_environment_snapshot() {
    polyctx::try_initialize_process(StaticRuntimeBindings::minimal());
    let host = MemoryHostEnvironment::new(vec![
        ("POLYCTX_OPT_WARN".to_string(), "2".to_string()),
        ("POLYCTX_OPT_ECHO".to_string(), "false".to_string()),
        ("POLYCTX_OPT_PAGER".to_string(), "less".to_string()),
    ]);
    let ctx = Context::create(Some(ContextConfig::exclusive()), host).unwrap();

    let state = ctx.state().unwrap();
    let options = state.options().unwrap();
    assert_eq!(options.get("warn"), Some(json!(2)));
    assert_eq!(options.get("echo"), Some(json!(false)));
    assert_eq!(options.get("pager"), Some(json!("less")));

    ctx.destroy().unwrap();
}

#[test]
fn invalid_option_override_aborts_activation_without_registering() {
    polyctx::try_initialize_process(StaticRuntimeBindings::minimal());
    let host = MemoryHostEnvironment::new(vec![(
        "POLYCTX_OPT_WARN".to_string(),
        "loud".to_string(),
    )]);

    assert!(!registry::is_bound());
    let result = Context::create(Some(ContextConfig::exclusive()), host);
    assert!(matches!(
        result.err(),
        Some(ContextError::StateInitFailed { module: "options", .. })
    ));
    // The aborted activation restored this thread's (empty) binding.
    assert!(!registry::is_bound());
}

#[test]
fn unreported_warnings_surface_on_the_console_at_teardown() {
    let host = setup();
    let console = host.memory_console();
    let ctx = Context::create(Some(ContextConfig::exclusive()), host).unwrap();
    ctx.state()
        .unwrap()
        .error_handling
        .add_warning("object 'x' not found");

    ctx.destroy().unwrap();
    assert!(
        console
            .error_lines()
            .iter()
            .any(|line| line.contains("object 'x' not found"))
    );
}

#[test]
fn parent_must_be_live() {
    let host = setup();
    let parent = Context::create(Some(ContextConfig::exclusive()), host.clone()).unwrap();
    let parent_id = parent.id();
    parent.destroy().unwrap();

    let orphan = Context::create(Some(ContextConfig::shared_read_copy(parent_id)), host);
    assert_eq!(orphan.err(), Some(ContextError::ParentNotLive));
}

#[test]
#[should_panic(expected = "already bound")]
fn double_bind_is_a_contract_violation() {
    let host = setup();
    let ctx = Context::create(Some(ContextConfig::exclusive()), host).unwrap();
    // create() bound this thread; binding again must panic.
    registry::bind(&ctx);
}

#[test]
fn host_environment_values_reach_the_env_vars_module() {
    polyctx::try_initialize_process(StaticRuntimeBindings::minimal());
    let host = MemoryHostEnvironment::new(vec![
        ("POLYCTX_PROFILE".to_string(), "/home/u/.profile".to_string()),
        ("LANG".to_string(), "C".to_string()),
    ]);
    assert_eq!(host.env_var("LANG").as_deref(), Some("C"));

    let ctx = Context::create(Some(ContextConfig::exclusive()), host).unwrap();
    let state = ctx.state().unwrap();
    assert_eq!(state.env_vars().unwrap().get("LANG").as_deref(), Some("C"));
    assert_eq!(
        state.profile().unwrap().user_profile(),
        Some("/home/u/.profile")
    );

    ctx.destroy().unwrap();
}
