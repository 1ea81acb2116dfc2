//! Planner - turns a `SachetConfig` into an explicit resource graph
//!
//! Every conditional in the desired state (managed accounts, install
//! method, init style, purge, restart-on-change) is resolved here, so the
//! graph handed to the executor is a fixed, enumerable set of resources.

use anyhow::Result;
use declarative::{CommandRunner, NodeId, ResourceGraph};
use std::sync::Arc;

use crate::render;
use crate::resource::{
    Attributes, Directory, Fetcher, HttpFetcher, ManagedFile, Package, PackageEnsure,
    ReleaseArchive, Service, SystemGroup, SystemUser, SystemdReload, Symlink,
};
use crate::resource::service::ServiceManager;
use crate::schema::{InitStyle, InstallMethod, SachetConfig};

const CONFIG_DIR_MODE: u32 = 0o750;
const TEMPLATE_MODE: u32 = 0o640;

/// Build the graph for `config` using the host's package manager and init system
pub fn build_graph(config: &SachetConfig, runner: Arc<dyn CommandRunner>) -> Result<ResourceGraph> {
    Planner::new(config, runner).build()
}

/// Graph builder with injectable process and download backends
pub struct Planner<'a> {
    config: &'a SachetConfig,
    runner: Arc<dyn CommandRunner>,
    fetcher: Arc<dyn Fetcher>,
}

impl<'a> Planner<'a> {
    pub fn new(config: &'a SachetConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            config,
            runner,
            fetcher: Arc::new(HttpFetcher),
        }
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn build(&self) -> Result<ResourceGraph> {
        let config = self.config;
        let mut graph = ResourceGraph::new();

        // Accounts
        let group = if config.manage_group {
            Some(graph.add(Box::new(SystemGroup::new(
                &config.group,
                self.runner.clone(),
            )))?)
        } else {
            None
        };
        let user = if config.manage_user {
            let user = graph.add(Box::new(SystemUser::new(
                &config.user,
                &config.group,
                &config.extra_groups,
                self.runner.clone(),
            )))?;
            if let Some(group) = group {
                graph.require(group, user)?;
            }
            Some(user)
        } else {
            None
        };
        let account = user.or(group);

        // Configuration files
        let files = self.add_config_files(&mut graph, account)?;

        // Install
        let install = self.add_install(&mut graph)?;

        // Init unit
        let (unit, reload) = self.add_unit(&mut graph)?;

        // Service
        if config.manage_service {
            let manager = match config.init_style() {
                InitStyle::Sysv => ServiceManager::Sysv,
                InitStyle::Systemd | InitStyle::None => ServiceManager::Systemd,
            };
            let service = graph.add(Box::new(Service::new(
                &config.service_name,
                config.service_ensure,
                config.service_enable,
                manager,
                self.runner.clone(),
            )))?;

            if let Some(account) = account {
                graph.require(account, service)?;
            }
            for node in files.into_iter().chain(install).chain(unit) {
                if config.restart_on_change {
                    graph.notify(node, service)?;
                } else {
                    graph.require(node, service)?;
                }
            }
            if let Some(reload) = reload {
                graph.require(reload, service)?;
            }
        }

        Ok(graph)
    }

    /// Config dir, templates dir, templates, config file.
    /// Returns the nodes whose changes should restart the service.
    fn add_config_files(
        &self,
        graph: &mut ResourceGraph,
        account: Option<NodeId>,
    ) -> Result<Vec<NodeId>> {
        let config = self.config;
        let owner = &config.config_owner;
        let dir_attrs = Attributes::new(owner, &config.group, CONFIG_DIR_MODE);
        let config_file = config.config_file();
        let templates_dir = config.templates_dir();

        let mut config_dir = Directory::new(&config.config_dir, dir_attrs.clone());
        let mut templates = Directory::new(&templates_dir, dir_attrs);
        if config.purge_config_dir {
            config_dir = config_dir.purge_except([config_file.clone(), templates_dir.clone()]);
            templates = templates.purge_except(
                config.templates.iter().map(|t| config.template_path(t)),
            );
        }

        let config_dir = graph.add(Box::new(config_dir))?;
        if let Some(account) = account {
            graph.require(account, config_dir)?;
        }
        let templates_dir = graph.add(Box::new(templates))?;
        graph.require(config_dir, templates_dir)?;

        let mut changed_by = Vec::new();
        let mut template_nodes = Vec::new();
        for template in &config.templates {
            let node = graph.add(Box::new(ManagedFile::new(
                "template",
                config.template_path(template),
                template.content.clone(),
                Attributes::new(owner, &config.group, TEMPLATE_MODE),
            )))?;
            graph.require(templates_dir, node)?;
            template_nodes.push(node);
        }

        let file = graph.add(Box::new(ManagedFile::new(
            "file",
            &config_file,
            render::render_config(config)?,
            Attributes::new(owner, &config.group, config.mode()?),
        )))?;
        graph.require(config_dir, file)?;
        graph.require(templates_dir, file)?;
        for node in &template_nodes {
            graph.require(*node, file)?;
        }

        changed_by.extend(template_nodes);
        changed_by.push(file);
        Ok(changed_by)
    }

    /// The install chain; returns its last node
    fn add_install(&self, graph: &mut ResourceGraph) -> Result<Option<NodeId>> {
        let config = self.config;
        let node = match config.install_method {
            InstallMethod::Url => {
                let archive = ReleaseArchive::new(
                    &render::download_url(config),
                    config.download_extension,
                    render::release_dir(config),
                    &config.package_name,
                )
                .with_fetcher(self.fetcher.clone());
                let link = Symlink::new(
                    archive.binary_path(),
                    config.bin_dir.join(&config.package_name),
                );
                let archive = graph.add(Box::new(archive))?;
                let link = graph.add(Box::new(link))?;
                graph.require(archive, link)?;
                link
            }
            InstallMethod::Package => graph.add(Box::new(Package::new(
                &config.package_name,
                PackageEnsure::parse(&config.package_ensure),
                self.runner.clone(),
            )))?,
        };
        Ok(Some(node))
    }

    /// Unit file and, for systemd, the daemon-reload it triggers
    fn add_unit(&self, graph: &mut ResourceGraph) -> Result<(Option<NodeId>, Option<NodeId>)> {
        let config = self.config;
        let (Some(path), Some(content)) = (render::unit_path(config), render::render_unit(config))
        else {
            return Ok((None, None));
        };

        let mode = match config.init_style() {
            InitStyle::Sysv => 0o755,
            _ => 0o644,
        };
        let unit = graph.add(Box::new(ManagedFile::new(
            "unit",
            path,
            content,
            Attributes::with_mode(mode),
        )))?;

        let reload = if config.init_style() == InitStyle::Systemd {
            let reload = graph.add(Box::new(SystemdReload::new(self.runner.clone())))?;
            graph.notify(unit, reload)?;
            Some(reload)
        } else {
            None
        };
        Ok((Some(unit), reload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::FakeRunner;
    use crate::schema::TemplateDef;
    use declarative::{EdgeKind, ResourceExt};
    use std::path::PathBuf;

    fn config() -> SachetConfig {
        SachetConfig {
            version: "1.0.0".into(),
            os: Some("linux".into()),
            arch: Some("amd64".into()),
            init_style: Some(InitStyle::Systemd),
            templates: vec![TemplateDef::new("a", "A"), TemplateDef::new("b", "B")],
            ..Default::default()
        }
    }

    fn keys(graph: &ResourceGraph) -> Vec<String> {
        graph
            .topo_order()
            .unwrap()
            .into_iter()
            .map(|id| graph.resource(id).key())
            .collect()
    }

    fn node(graph: &ResourceGraph, key: &str) -> NodeId {
        graph.find(key).unwrap_or_else(|| panic!("missing {key}"))
    }

    #[test]
    fn test_full_graph_order() {
        let graph = build_graph(&config(), Arc::new(FakeRunner::succeeding())).unwrap();

        assert_eq!(
            keys(&graph),
            vec![
                "group:sachet",
                "user:sachet",
                "directory:/etc/sachet",
                "directory:/etc/sachet/templates",
                "template:/etc/sachet/templates/a.tmpl",
                "template:/etc/sachet/templates/b.tmpl",
                "file:/etc/sachet/sachet.yaml",
                "archive:/opt/sachet-1.0.0.linux-amd64",
                "symlink:/usr/local/bin/sachet",
                "unit:/etc/systemd/system/sachet.service",
                "systemd_reload:daemon-reload",
                "service:sachet",
            ]
        );
    }

    #[test]
    fn test_restart_edges() {
        let graph = build_graph(&config(), Arc::new(FakeRunner::succeeding())).unwrap();
        let service = node(&graph, "service:sachet");

        for key in [
            "file:/etc/sachet/sachet.yaml",
            "template:/etc/sachet/templates/a.tmpl",
            "symlink:/usr/local/bin/sachet",
            "unit:/etc/systemd/system/sachet.service",
        ] {
            assert_eq!(
                graph.edge(node(&graph, key), service),
                Some(EdgeKind::Notify),
                "{key}"
            );
        }
        assert_eq!(
            graph.edge(node(&graph, "systemd_reload:daemon-reload"), service),
            Some(EdgeKind::Require)
        );
        assert_eq!(
            graph.edge(
                node(&graph, "unit:/etc/systemd/system/sachet.service"),
                node(&graph, "systemd_reload:daemon-reload")
            ),
            Some(EdgeKind::Notify)
        );
    }

    #[test]
    fn test_no_restart_on_change() {
        let config = SachetConfig {
            restart_on_change: false,
            ..config()
        };
        let graph = build_graph(&config, Arc::new(FakeRunner::succeeding())).unwrap();
        let service = node(&graph, "service:sachet");
        assert_eq!(
            graph.edge(node(&graph, "file:/etc/sachet/sachet.yaml"), service),
            Some(EdgeKind::Require)
        );
    }

    #[test]
    fn test_package_install_unmanaged_accounts_no_unit() {
        let config = SachetConfig {
            install_method: InstallMethod::Package,
            manage_user: false,
            manage_group: false,
            manage_service: false,
            init_style: Some(InitStyle::None),
            templates: Vec::new(),
            ..config()
        };
        let graph = build_graph(&config, Arc::new(FakeRunner::succeeding())).unwrap();
        assert_eq!(
            keys(&graph),
            vec![
                "directory:/etc/sachet",
                "directory:/etc/sachet/templates",
                "file:/etc/sachet/sachet.yaml",
                "package:sachet",
            ]
        );
    }

    #[test]
    fn test_sysv_unit_has_no_reload() {
        let config = SachetConfig {
            init_style: Some(InitStyle::Sysv),
            ..config()
        };
        let graph = build_graph(&config, Arc::new(FakeRunner::succeeding())).unwrap();
        assert!(graph.find("unit:/etc/init.d/sachet").is_some());
        assert!(graph.find("systemd_reload:daemon-reload").is_none());
    }

    #[test]
    fn test_custom_config_file_path() {
        let config = SachetConfig {
            config_file: Some(PathBuf::from("/etc/sachet.yml")),
            ..config()
        };
        let graph = build_graph(&config, Arc::new(FakeRunner::succeeding())).unwrap();
        assert!(graph.find("file:/etc/sachet.yml").is_some());
    }

    #[test]
    fn test_target_filter_keeps_edges() {
        let graph = build_graph(&config(), Arc::new(FakeRunner::succeeding()))
            .unwrap()
            .filter_by_target(Some("files"));
        assert_eq!(graph.len(), 5);
        assert!(graph.find("service:sachet").is_none());
        let dir = node(&graph, "directory:/etc/sachet");
        let file = node(&graph, "file:/etc/sachet/sachet.yaml");
        assert_eq!(graph.edge(dir, file), Some(EdgeKind::Require));
    }
}
