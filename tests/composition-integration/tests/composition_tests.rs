//! 图构建场景测试

mod support;

use async_trait::async_trait;
use di_abstractions::{
    Cardinality, ComposableCatalog, DiscoveredParts, ExportDefinition, ImportDefinition, ImportDefinitionBinding,
    PartDefinition, PartDiscovery, Resolver, RuntimeComposition, TypeRegistration, UnitLoader,
};
use infrastructure_common::{BoxError, CatalogError, CompositionErrorKind, MemberRef, TypeRef};
use infrastructure_composition::{CompositionBuilder, CompositionConfiguration};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use support::{constructed, member, part, ty};

fn catalog(parts: Vec<PartDefinition>) -> ComposableCatalog {
    ComposableCatalog::new().add_parts(parts).expect("部件不冲突")
}

#[test]
fn test_unsatisfied_import_names_part_and_contract() {
    let configuration = CompositionConfiguration::create(catalog(vec![
        part("Consumer").with_import(member("Consumer", "Logger")),
    ]));

    assert!(!configuration.is_valid());
    let error = &configuration.error_groups()[0][0];
    assert_eq!(error.kind, CompositionErrorKind::UnsatisfiedImport);
    assert_eq!(error.part(), Some(&ty("Consumer")));
    assert_eq!(error.contract.as_deref(), Some("app::Logger"));
    assert!(error.message.contains("app::Consumer"));
    assert!(configuration.throw_on_errors().is_err());
}

#[test]
fn test_constructor_cycle_is_one_error_and_its_consumers_follow() {
    let configuration = CompositionConfiguration::create(catalog(vec![
        constructed("Engine", &["Gearbox"]),
        constructed("Gearbox", &["Engine"]),
        part("Car").with_import(member("Car", "Engine")),
        part("Radio"),
    ]));

    let groups = configuration.error_groups();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].len(), 1);
    assert_eq!(groups[0][0].kind, CompositionErrorKind::IllegalCycle);
    assert_eq!(groups[0][0].parts, vec![ty("Engine"), ty("Gearbox")]);

    assert_eq!(groups[1].len(), 1);
    assert_eq!(groups[1][0].kind, CompositionErrorKind::UnsatisfiedImport);
    assert_eq!(groups[1][0].part(), Some(&ty("Car")));

    let surviving: Vec<&TypeRef> = configuration.parts().iter().map(|p| &p.definition.type_ref).collect();
    assert_eq!(surviving, vec![&ty("Radio")]);
}

#[test]
fn test_eager_member_cycle_is_one_illegal_cycle() {
    let configuration = CompositionConfiguration::create(catalog(vec![
        part("PartA").with_import(member("PartA", "PartB")),
        part("PartB").with_import(member("PartB", "PartA")),
    ]));

    let errors: Vec<_> = configuration.error_groups().iter().flatten().collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, CompositionErrorKind::IllegalCycle);
    assert_eq!(errors[0].parts, vec![ty("PartA"), ty("PartB")]);
    assert!(configuration.parts().is_empty());
}

#[test]
fn test_member_cycle_with_one_lazy_edge_is_legal() {
    let configuration = CompositionConfiguration::create(catalog(vec![
        part("Parent").with_import(member("Parent", "Child")),
        part("Child").with_import(member("Child", "Parent").lazy()),
    ]));
    assert!(configuration.is_valid());
}

#[test]
fn test_catalog_merge_is_idempotent() {
    let first = catalog(vec![part("Logger"), part("Clock")]);
    let again = first.add_parts(vec![part("Logger")]).expect("相同部件去重");
    assert_eq!(again, first);
    assert_eq!(first.add_catalog(&first).expect("自身合并"), first);

    let conflicting = part("Logger").with_import(member("Logger", "Clock"));
    assert!(matches!(
        first.add_parts(vec![conflicting]),
        Err(CatalogError::ConflictingPart { .. })
    ));
}

#[test]
fn test_zero_or_more_follows_catalog_order() {
    let plugin = ty("IPlugin");
    let exporter = |name: &str| PartDefinition::new(ty(name)).with_export(ExportDefinition::new(plugin.clone()));
    let host = part("Host").with_import(ImportDefinitionBinding::member(
        MemberRef::property(ty("Host"), "plugins"),
        ImportDefinition::new(plugin.clone()).with_cardinality(Cardinality::ZeroOrMore),
    ));

    let configuration = CompositionConfiguration::create(catalog(vec![
        exporter("Zeta"),
        host,
        exporter("Alpha"),
        exporter("Mid"),
    ]));
    let host = configuration.part(&ty("Host")).expect("Host 已组合");
    let order: Vec<String> = host.satisfying_exports[0]
        .iter()
        .map(|binding| configuration.parts()[binding.part].definition.type_ref.to_string())
        .collect();
    assert_eq!(order, vec!["app::Zeta", "app::Alpha", "app::Mid"]);
}

#[test]
fn test_open_generic_closed_only_for_requested_arguments() {
    let open = TypeRef::generic("app", "app::Repository", vec![TypeRef::parameter(0)]);
    let user = TypeRef::new("model", "model::User");
    let closed = TypeRef::generic("app", "app::Repository", vec![user.clone()]);

    let configuration = CompositionConfiguration::create(catalog(vec![
        PartDefinition::new(open.clone())
            .with_self_export()
            .with_import(ImportDefinitionBinding::member(
                MemberRef::property(open.clone(), "entity"),
                ImportDefinition::new(TypeRef::parameter(0)),
            )),
        PartDefinition::new(user.clone()).with_self_export(),
        part("Service").with_import(ImportDefinitionBinding::member(
            MemberRef::property(ty("Service"), "users"),
            ImportDefinition::new(closed.clone()),
        )),
    ]));

    assert!(configuration.is_valid());
    assert!(configuration.part(&closed).is_some());
    assert!(configuration.part(&open).is_none());
    assert_eq!(configuration.parts().len(), 3);
}

#[test]
fn test_scoped_import_skips_exports_from_sibling_boundary() {
    let plugin = ty("IPlugin");
    let configuration = CompositionConfiguration::create(catalog(vec![
        PartDefinition::new(ty("RootPlugin")).with_export(ExportDefinition::new(plugin.clone())),
        PartDefinition::new(ty("UploadPlugin"))
            .with_sharing_boundary("upload")
            .with_export(ExportDefinition::new(plugin.clone())),
        part("Request")
            .with_sharing_boundary("request")
            .with_import(ImportDefinitionBinding::member(
                MemberRef::property(ty("Request"), "plugins"),
                ImportDefinition::new(plugin).with_cardinality(Cardinality::ZeroOrMore),
            )),
    ]));

    assert!(configuration.is_valid(), "{:?}", configuration.error_groups());
    let request = configuration.part(&ty("Request")).expect("Request 已组合");
    let bound: Vec<&TypeRef> = request.satisfying_exports[0]
        .iter()
        .map(|binding| &configuration.parts()[binding.part].definition.type_ref)
        .collect();
    assert_eq!(bound, vec![&ty("RootPlugin")]);
}

struct CountingLoader {
    loads: AtomicUsize,
}

impl UnitLoader for CountingLoader {
    fn load(&self, unit: &str, resolver: &Resolver) -> Result<(), BoxError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if unit == "plugins" {
            resolver.register_type(
                TypeRef::new("plugins", "plugins::Reporter"),
                TypeRegistration::new(|_| Ok(Reporter)),
            );
        }
        Ok(())
    }
}

struct Reporter;

#[tokio::test]
async fn test_input_units_do_not_trigger_loading() -> anyhow::Result<()> {
    let reporter = TypeRef::new("plugins", "plugins::Reporter");
    let loader = Arc::new(CountingLoader {
        loads: AtomicUsize::new(0),
    });
    let resolver = Arc::new(Resolver::with_loader(loader.clone()));

    let builder = CompositionBuilder::new()
        .add_part(PartDefinition::new(reporter.clone()).with_self_export())
        .with_resolver(resolver.clone());
    let units = builder.build_catalog().await?.get_input_units();
    assert!(units.contains("plugins"));

    let provider = builder.build().await?;
    assert_eq!(loader.loads.load(Ordering::SeqCst), 0);
    assert!(resolver.loaded_units().is_empty());

    provider.get_exported_value_by_contract::<Reporter>("plugins::Reporter")?;
    assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    assert_eq!(resolver.loaded_units(), vec!["plugins".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_runtime_composition_round_trips() -> anyhow::Result<()> {
    let runtime = CompositionBuilder::new()
        .add_parts(vec![
            constructed("Service", &["Logger"]),
            part("Logger").with_sharing_boundary("request"),
            part("Host").with_import(member("Host", "Service").export_factory(["request"])),
        ])
        .build_runtime()
        .await?;

    let mut bytes = Vec::new();
    runtime.save(&mut bytes)?;
    assert_eq!(RuntimeComposition::load(bytes.as_slice())?, runtime);

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("runtime.json");
    runtime.save_to_file(&path).await?;
    assert_eq!(RuntimeComposition::load_from_file(&path).await?, runtime);
    Ok(())
}

/// 记录调用次数的发现器
struct RecordingDiscovery {
    calls: Mutex<usize>,
    parts: Vec<PartDefinition>,
}

#[async_trait]
impl PartDiscovery for RecordingDiscovery {
    async fn discover(&self) -> DiscoveredParts {
        *self.calls.lock() += 1;
        DiscoveredParts {
            parts: self.parts.clone(),
            errors: Vec::new(),
        }
    }

    fn name(&self) -> &str {
        "recording"
    }
}

#[tokio::test]
async fn test_discoveries_feed_the_graph_builder() -> anyhow::Result<()> {
    let configuration = CompositionBuilder::new()
        .add_part(part("Consumer").with_import(member("Consumer", "Logger")))
        .add_discovery(RecordingDiscovery {
            calls: Mutex::new(0),
            parts: vec![part("Logger")],
        })
        .build_configuration()
        .await?;

    assert!(configuration.is_valid());
    let graph = configuration.dependency_graph();
    assert_eq!(graph.edges.len(), 1);
    assert!(graph.to_dot().contains("app::Logger"));
    Ok(())
}
