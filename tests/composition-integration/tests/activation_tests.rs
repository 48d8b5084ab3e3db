//! 激活场景测试：从部件定义一路构建到导出提供者

mod support;

use di_abstractions::{DeferredValue, ExportFactory, PartDefinition, Resolver, TypeRegistration};
use di_impl::{ExportProvider, ExportQuery};
use infrastructure_common::{ActivationError, BoxError, CompositionOptions, CreationPolicy, Disposable};
use infrastructure_composition::CompositionBuilder;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use support::{constructed, member, part, ty};

async fn compose(parts: Vec<PartDefinition>, resolver: Resolver) -> anyhow::Result<ExportProvider> {
    Ok(CompositionBuilder::new()
        .add_parts(parts)
        .with_resolver(Arc::new(resolver))
        .build()
        .await?)
}

#[derive(Debug)]
struct Logger;
struct Message;

#[tokio::test]
async fn test_shared_and_non_shared_instances() -> anyhow::Result<()> {
    let resolver = Resolver::new();
    resolver.register_type(ty("Logger"), TypeRegistration::new(|_| Ok(Logger)));
    resolver.register_type(ty("Message"), TypeRegistration::new(|_| Ok(Message)));

    let provider = compose(
        vec![
            part("Logger").with_creation_policy(CreationPolicy::Shared),
            part("Message").with_creation_policy(CreationPolicy::NonShared),
        ],
        resolver,
    )
    .await?;

    let a = provider.get_exported_value_by_contract::<Logger>("app::Logger")?;
    let b = provider.get_exported_value_by_contract::<Logger>("app::Logger")?;
    assert!(Arc::ptr_eq(&a, &b));

    let x = provider.get_exported_value_by_contract::<Message>("app::Message")?;
    let y = provider.get_exported_value_by_contract::<Message>("app::Message")?;
    assert!(!Arc::ptr_eq(&x, &y));

    assert!(matches!(
        provider.get_export(&ExportQuery::new("app::Unknown")),
        Err(ActivationError::CardinalityMismatch { .. })
    ));
    Ok(())
}

struct Parent {
    child: Mutex<Option<Arc<Child>>>,
}

struct Child {
    parent: Mutex<Option<DeferredValue>>,
}

#[tokio::test]
async fn test_lazy_cycle_is_wired_both_ways() -> anyhow::Result<()> {
    let resolver = Resolver::new();
    resolver.register_type(
        ty("Parent"),
        TypeRegistration::new(|_| Ok(Parent { child: Mutex::new(None) })).setter("child", |parent: &Parent, value| {
            *parent.child.lock() = Some(value.single::<Child>()?);
            Ok(())
        }),
    );
    resolver.register_type(
        ty("Child"),
        TypeRegistration::new(|_| Ok(Child { parent: Mutex::new(None) })).setter("parent", |child: &Child, value| {
            *child.parent.lock() = Some(value.deferred()?);
            Ok(())
        }),
    );

    let provider = compose(
        vec![
            part("Parent").with_import(member("Parent", "Child")),
            part("Child").with_import(member("Child", "Parent").lazy()),
        ],
        resolver,
    )
    .await?;

    let parent = provider.get_exported_value_by_contract::<Parent>("app::Parent")?;
    let child = parent.child.lock().clone().expect("child 已注入");
    let back = child.parent.lock().clone().expect("parent 已注入").value_as::<Parent>()?;
    assert!(Arc::ptr_eq(&parent, &back));
    Ok(())
}

struct Clock;

struct RequestContext {
    disposed: Arc<AtomicBool>,
}

impl Disposable for RequestContext {
    fn dispose(&self) -> Result<(), BoxError> {
        self.disposed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct Handler {
    context: Mutex<Option<Arc<RequestContext>>>,
    clock: Mutex<Option<Arc<Clock>>>,
}

struct Server {
    handlers: Mutex<Option<ExportFactory>>,
}

#[tokio::test]
async fn test_sibling_factory_scopes_are_isolated() -> anyhow::Result<()> {
    let resolver = Resolver::new();
    resolver.register_type(ty("Clock"), TypeRegistration::new(|_| Ok(Clock)));
    resolver.register_type(
        ty("RequestContext"),
        TypeRegistration::new(|_| {
            Ok(RequestContext {
                disposed: Arc::new(AtomicBool::new(false)),
            })
        })
        .disposable(),
    );
    resolver.register_type(
        ty("Handler"),
        TypeRegistration::new(|_| {
            Ok(Handler {
                context: Mutex::new(None),
                clock: Mutex::new(None),
            })
        })
        .setter("requestcontext", |handler: &Handler, value| {
            *handler.context.lock() = Some(value.single::<RequestContext>()?);
            Ok(())
        })
        .setter("clock", |handler: &Handler, value| {
            *handler.clock.lock() = Some(value.single::<Clock>()?);
            Ok(())
        }),
    );
    resolver.register_type(
        ty("Server"),
        TypeRegistration::new(|_| Ok(Server { handlers: Mutex::new(None) })).setter("handler", |server: &Server, value| {
            *server.handlers.lock() = Some(value.factory()?);
            Ok(())
        }),
    );

    let provider = compose(
        vec![
            part("Clock"),
            part("RequestContext")
                .with_sharing_boundary("request")
                .with_creation_policy(CreationPolicy::Shared)
                .disposable(),
            part("Handler")
                .with_sharing_boundary("request")
                .with_import(member("Handler", "RequestContext"))
                .with_import(member("Handler", "Clock")),
            part("Server").with_import(member("Server", "Handler").export_factory(["request"])),
        ],
        resolver,
    )
    .await?;

    let server = provider.get_exported_value_by_contract::<Server>("app::Server")?;
    let factory = server.handlers.lock().clone().expect("工厂已注入");
    let first = factory.create_export()?;
    let second = factory.create_export()?;

    let one = first.value_as::<Handler>()?;
    let two = second.value_as::<Handler>()?;
    assert!(!Arc::ptr_eq(&one, &two));

    let context_one = one.context.lock().clone().expect("上下文已注入");
    let context_two = two.context.lock().clone().expect("上下文已注入");
    assert!(!Arc::ptr_eq(&context_one, &context_two));

    let clock_one = one.clock.lock().clone().expect("时钟已注入");
    let clock_two = two.clock.lock().clone().expect("时钟已注入");
    assert!(Arc::ptr_eq(&clock_one, &clock_two));

    first.dispose().map_err(|e| anyhow::anyhow!(e))?;
    assert!(context_one.disposed.load(Ordering::SeqCst));
    assert!(!context_two.disposed.load(Ordering::SeqCst));

    provider.dispose()?;
    assert!(context_two.disposed.load(Ordering::SeqCst));
    Ok(())
}

#[tokio::test]
async fn test_explicit_scopes_own_boundary_parts() -> anyhow::Result<()> {
    let resolver = Resolver::new();
    resolver.register_type(
        ty("RequestContext"),
        TypeRegistration::new(|_| {
            Ok(RequestContext {
                disposed: Arc::new(AtomicBool::new(false)),
            })
        })
        .disposable(),
    );
    let provider = compose(
        vec![part("RequestContext").with_sharing_boundary("request").disposable()],
        resolver,
    )
    .await?;

    assert!(matches!(
        provider.get_exported_value_by_contract::<RequestContext>("app::RequestContext"),
        Err(ActivationError::SharingBoundaryUnavailable { .. })
    ));

    let request = provider.create_scope(["request"])?;
    let context = request.get_exported_value_by_contract::<RequestContext>("app::RequestContext")?;
    assert!(Arc::ptr_eq(
        &context,
        &request.get_exported_value_by_contract::<RequestContext>("app::RequestContext")?
    ));

    request.dispose()?;
    assert!(context.disposed.load(Ordering::SeqCst));
    assert!(matches!(
        request.get_exported_value_by_contract::<RequestContext>("app::RequestContext"),
        Err(ActivationError::Disposed { .. })
    ));
    Ok(())
}

struct Tracked {
    name: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl Disposable for Tracked {
    fn dispose(&self) -> Result<(), BoxError> {
        self.log.lock().push(self.name);
        if self.name == "Cache" {
            return Err("缓存刷新失败".into());
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_disposal_continues_past_failures() -> anyhow::Result<()> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let resolver = Resolver::new();
    for name in ["Database", "Cache", "Mailer"] {
        let log = log.clone();
        resolver.register_type(
            ty(name),
            TypeRegistration::new(move |_| {
                Ok(Tracked {
                    name,
                    log: log.clone(),
                })
            })
            .disposable(),
        );
    }

    let provider = compose(
        vec![part("Database").disposable(), part("Cache").disposable(), part("Mailer").disposable()],
        resolver,
    )
    .await?;
    for contract in ["app::Database", "app::Cache", "app::Mailer"] {
        provider.get_exported_value_by_contract::<Tracked>(contract)?;
    }

    let error = provider.dispose().expect_err("Cache 释放失败");
    assert_eq!(error.failures.len(), 1);
    assert_eq!(error.failures[0].part, "app::Cache");
    assert_eq!(*log.lock(), vec!["Mailer", "Cache", "Database"]);

    assert!(provider.dispose().is_ok());
    assert_eq!(log.lock().len(), 3);
    Ok(())
}

struct Expensive;

#[tokio::test]
async fn test_concurrent_shared_construction_happens_once() -> anyhow::Result<()> {
    let constructed = Arc::new(AtomicUsize::new(0));
    let counter = constructed.clone();
    let resolver = Resolver::new();
    resolver.register_type(
        ty("Expensive"),
        TypeRegistration::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(25));
            Ok(Expensive)
        }),
    );
    resolver.register_type(ty("Consumer"), TypeRegistration::new(|_| Ok(Expensive)));

    let provider = Arc::new(
        compose(
            vec![
                part("Expensive").with_creation_policy(CreationPolicy::Shared),
                support::constructed("Consumer", &["Expensive"]).with_creation_policy(CreationPolicy::NonShared),
            ],
            resolver,
        )
        .await?,
    );

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let provider = provider.clone();
            thread::spawn(move || {
                let contract = if i % 2 == 0 { "app::Expensive" } else { "app::Consumer" };
                provider.get_exported_value_by_contract::<Expensive>(contract).map(|_| ())
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("线程不应 panic")?;
    }

    assert_eq!(constructed.load(Ordering::SeqCst), 1);
    Ok(())
}

struct Connection;

#[tokio::test]
async fn test_failed_construction_is_retried() -> anyhow::Result<()> {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let resolver = Resolver::new();
    resolver.register_type(
        ty("Connection"),
        TypeRegistration::new(move |_| -> Result<Connection, BoxError> {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err("连接被拒绝".into())
            } else {
                Ok(Connection)
            }
        }),
    );
    resolver.register_type(
        ty("Repository"),
        TypeRegistration::new(|mut arguments| {
            arguments.take(0)?.single::<Connection>()?;
            Ok(Logger)
        }),
    );

    let provider = CompositionBuilder::new()
        .add_parts(vec![
            part("Connection").with_creation_policy(CreationPolicy::Shared),
            constructed("Repository", &["Connection"]),
        ])
        .with_resolver(Arc::new(resolver))
        .with_options(CompositionOptions::default())
        .build()
        .await?;

    let error = provider
        .get_exported_value_by_contract::<Logger>("app::Repository")
        .expect_err("第一次连接失败");
    assert!(matches!(error, ActivationError::DependencyFailed { .. }));
    assert!(matches!(error.root_cause(), ActivationError::ConstructionFailed { .. }));

    provider.get_exported_value_by_contract::<Logger>("app::Repository")?;
    provider.get_exported_value_by_contract::<Connection>("app::Connection")?;
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    Ok(())
}

struct Link;

#[tokio::test]
async fn test_long_dependency_chain_activates() -> anyhow::Result<()> {
    const LENGTH: usize = 140;
    let resolver = Resolver::new();
    let mut parts = Vec::with_capacity(LENGTH);
    for i in 0..LENGTH {
        let name = format!("P{}", i);
        let mut registration = TypeRegistration::new(|_| Ok(Link));
        let mut definition = part(&name);
        if i + 1 < LENGTH {
            let next = format!("P{}", i + 1);
            registration = registration.setter(next.to_lowercase(), |_: &Link, value| {
                value.single::<Link>()?;
                Ok(())
            });
            definition = definition.with_import(member(&name, &next));
        }
        resolver.register_type(ty(&name), registration);
        parts.push(definition);
    }

    let provider = compose(parts, resolver).await?;
    provider.get_exported_value_by_contract::<Link>("app::P0")?;
    provider.get_exported_value_by_contract::<Link>(&format!("app::P{}", LENGTH - 1))?;
    Ok(())
}

struct Slow {
    saw_fast: bool,
}

struct Fast;

#[tokio::test]
async fn test_unrelated_parts_build_in_parallel() -> anyhow::Result<()> {
    let (started_tx, started_rx) = mpsc::channel::<()>();
    let (fast_tx, fast_rx) = mpsc::channel::<()>();
    let started = Mutex::new(started_tx);
    let fast_built = Mutex::new(fast_rx);

    let resolver = Resolver::new();
    resolver.register_type(
        ty("Slow"),
        TypeRegistration::new(move |_| {
            let _ = started.lock().send(());
            let saw_fast = fast_built.lock().recv_timeout(Duration::from_secs(5)).is_ok();
            Ok(Slow { saw_fast })
        }),
    );
    resolver.register_type(ty("Fast"), TypeRegistration::new(|_| Ok(Fast)));

    let provider = Arc::new(
        compose(
            vec![
                part("Slow").with_creation_policy(CreationPolicy::Shared),
                part("Fast").with_creation_policy(CreationPolicy::Shared),
            ],
            resolver,
        )
        .await?,
    );

    let slow = {
        let provider = provider.clone();
        thread::spawn(move || {
            provider
                .get_exported_value_by_contract::<Slow>("app::Slow")
                .map(|slow| slow.saw_fast)
        })
    };

    // Slow 的构造函数仍在执行时构造 Fast
    started_rx.recv_timeout(Duration::from_secs(5))?;
    provider.get_exported_value_by_contract::<Fast>("app::Fast")?;
    fast_tx.send(())?;

    assert!(slow.join().expect("线程不应 panic")?);
    Ok(())
}

#[derive(Debug)]
struct Service;

#[tokio::test]
async fn test_completed_shared_dependency_survives_sibling_failure() -> anyhow::Result<()> {
    let cache_builds = Arc::new(AtomicUsize::new(0));
    let database_attempts = Arc::new(AtomicUsize::new(0));
    let resolver = Resolver::new();

    let counter = cache_builds.clone();
    resolver.register_type(
        ty("Cache"),
        TypeRegistration::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Service)
        }),
    );
    let counter = database_attempts.clone();
    resolver.register_type(
        ty("Database"),
        TypeRegistration::new(move |_| -> Result<Service, BoxError> {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err("数据库尚未就绪".into())
            } else {
                Ok(Service)
            }
        }),
    );
    resolver.register_type(
        ty("Gateway"),
        TypeRegistration::new(|_| Ok(Service))
            .setter("cache", |_: &Service, value| {
                value.single::<Service>()?;
                Ok(())
            })
            .setter("database", |_: &Service, value| {
                value.single::<Service>()?;
                Ok(())
            }),
    );

    let provider = compose(
        vec![
            part("Cache").with_creation_policy(CreationPolicy::Shared),
            part("Database").with_creation_policy(CreationPolicy::Shared),
            part("Gateway")
                .with_import(member("Gateway", "Cache"))
                .with_import(member("Gateway", "Database")),
        ],
        resolver,
    )
    .await?;

    let error = provider
        .get_exported_value_by_contract::<Service>("app::Gateway")
        .expect_err("数据库首次构造失败");
    assert!(matches!(error.root_cause(), ActivationError::ConstructionFailed { .. }));

    let cache = provider.get_exported_value_by_contract::<Service>("app::Cache")?;
    assert_eq!(cache_builds.load(Ordering::SeqCst), 1);

    provider.get_exported_value_by_contract::<Service>("app::Gateway")?;
    let again = provider.get_exported_value_by_contract::<Service>("app::Cache")?;
    assert!(Arc::ptr_eq(&cache, &again));
    assert_eq!(cache_builds.load(Ordering::SeqCst), 1);
    assert_eq!(database_attempts.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn test_failed_setter_leaves_instance_with_its_scope() -> anyhow::Result<()> {
    let disposed = Arc::new(AtomicBool::new(false));
    let flag = disposed.clone();
    let resolver = Resolver::new();
    resolver.register_type(ty("Clock"), TypeRegistration::new(|_| Ok(Clock)));
    resolver.register_type(
        ty("RequestContext"),
        TypeRegistration::new(move |_| {
            Ok(RequestContext {
                disposed: flag.clone(),
            })
        })
        .setter("clock", |_: &RequestContext, _| Err("时钟不可用".into()))
        .disposable(),
    );

    let provider = compose(
        vec![
            part("Clock"),
            part("RequestContext")
                .disposable()
                .with_import(member("RequestContext", "Clock")),
        ],
        resolver,
    )
    .await?;

    let error = provider
        .get_exported_value_by_contract::<RequestContext>("app::RequestContext")
        .err()
        .expect("设置导入应当失败");
    assert!(matches!(error, ActivationError::ImportSetFailed { .. }));
    assert!(!disposed.load(Ordering::SeqCst));

    provider.dispose()?;
    assert!(disposed.load(Ordering::SeqCst));
    Ok(())
}

#[tokio::test]
async fn test_scope_disposed_mid_activation_disposes_late_instance() -> anyhow::Result<()> {
    let disposed = Arc::new(AtomicBool::new(false));
    let (started_tx, started_rx) = mpsc::channel::<()>();
    let (resume_tx, resume_rx) = mpsc::channel::<()>();
    let started = Mutex::new(started_tx);
    let resume = Mutex::new(resume_rx);

    let flag = disposed.clone();
    let resolver = Resolver::new();
    resolver.register_type(
        ty("RequestContext"),
        TypeRegistration::new(move |_| {
            let _ = started.lock().send(());
            let _ = resume.lock().recv_timeout(Duration::from_secs(5));
            Ok(RequestContext {
                disposed: flag.clone(),
            })
        })
        .disposable(),
    );

    let provider = Arc::new(compose(vec![part("RequestContext").disposable()], resolver).await?);
    let activation = {
        let provider = provider.clone();
        thread::spawn(move || {
            provider
                .get_exported_value_by_contract::<RequestContext>("app::RequestContext")
                .err()
        })
    };

    started_rx.recv_timeout(Duration::from_secs(5))?;
    provider.dispose()?;
    resume_tx.send(())?;

    let error = activation.join().expect("线程不应 panic");
    assert!(matches!(error, Some(ActivationError::Disposed { .. })));
    assert!(disposed.load(Ordering::SeqCst));
    Ok(())
}
