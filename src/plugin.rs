/*! Plugin and instance lifecycle, resolved at compile time.

The original engine discovered plugins by `dlopen`-ing a shared object
and pulling a `plugin_descriptor` of five function pointers out of it.
Rust's `dyn Trait` plus a `linkme`-free static registry gives the same
load/start/stop lifecycle without the unsafety of resolving symbols
from a `.so` at runtime, and without inventing a build-time codegen
step: plugins are simply registered by name in [`Runtime::new`] before
any configuration is read.

Lifecycle order is preserved exactly: loading happens in configuration
order, starting is post-order (every plugin's [`Plugin::start_plugin`]
before any instance's [`Plugin::start_instance`]), stopping is the
reverse.
*/

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{Configuration, Configurator};
use crate::error::{Error, Result};

/// One loadable unit. A plugin owns zero or more named instances, each
/// independently started and stopped.
pub trait Plugin: Send + Sync {
    /// Plugin name, matched against `<Plugin name="...">`.
    fn name(&self) -> &str;

    /// Called once per plugin, before any instance of any plugin
    /// starts.
    fn start_plugin(&self, settings: &[(String, String)]) -> Result<()> {
        let _ = settings;
        Ok(())
    }

    /// Called once per plugin, after every instance of every plugin has
    /// stopped.
    fn stop_plugin(&self) {}

    /// Create, configure, and start one named instance.
    fn start_instance(&self, instance_name: &str, settings: &[(String, String)]) -> Result<()>;

    /// Stop a previously started instance.
    fn stop_instance(&self, instance_name: &str);
}

/// Drives the plugin/instance lifecycle against a compile-time registry
/// of [`Plugin`] implementations and a parsed [`Configuration`].
pub struct Runtime {
    plugins: HashMap<String, Arc<dyn Plugin>>,
    started_instances: Vec<(String, String)>,
    started_plugins: Vec<String>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// Create an empty runtime with no plugins registered.
    pub fn new() -> Self {
        Self {
            plugins: HashMap::new(),
            started_instances: Vec::new(),
            started_plugins: Vec::new(),
        }
    }

    /// Register a plugin implementation under its own name. Mirrors
    /// `load_so` + `getsym_so`, minus the shared-object handle.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) -> Result<()> {
        let name = plugin.name().to_string();
        if self.plugins.contains_key(&name) {
            return Err(Error::AlreadyExists(name));
        }
        self.plugins.insert(name, plugin);
        Ok(())
    }

    /// Start every plugin named in `config`, in configuration order,
    /// then every instance of every plugin.
    pub fn start(&mut self, config: &Configuration) -> Result<()> {
        for plugin_config in &config.plugins {
            let plugin = self
                .plugins
                .get(&plugin_config.name)
                .cloned()
                .ok_or_else(|| Error::NotFound(plugin_config.name.clone()))?;
            plugin.start_plugin(&plugin_config.settings)?;
            self.started_plugins.push(plugin_config.name.clone());
        }
        for plugin_config in &config.plugins {
            let plugin = self.plugins.get(&plugin_config.name).cloned().unwrap();
            for instance in &plugin_config.instances {
                plugin.start_instance(&instance.name, &instance.settings)?;
                self.started_instances
                    .push((plugin_config.name.clone(), instance.name.clone()));
            }
        }
        Ok(())
    }

    /// Stop every started instance, then every started plugin, in
    /// reverse of their start order.
    pub fn stop(&mut self) {
        for (plugin_name, instance_name) in self.started_instances.drain(..).rev() {
            if let Some(plugin) = self.plugins.get(&plugin_name) {
                plugin.stop_instance(&instance_name);
            }
        }
        for plugin_name in self.started_plugins.drain(..).rev() {
            if let Some(plugin) = self.plugins.get(&plugin_name) {
                plugin.stop_plugin();
            }
        }
    }
}

/// Adapts a [`Configurator`] plus an instance-construction closure into
/// the settings-application step every [`Plugin::start_instance`]
/// implementation needs.
pub fn apply_settings(configurator: &mut dyn Configurator, settings: &[(String, String)]) -> Result<()> {
    crate::config::configure(configurator, settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recording {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
    }
    impl Plugin for Recording {
        fn name(&self) -> &str {
            &self.name
        }
        fn start_plugin(&self, _settings: &[(String, String)]) -> Result<()> {
            self.log.lock().unwrap().push(format!("start_plugin:{}", self.name));
            Ok(())
        }
        fn stop_plugin(&self) {
            self.log.lock().unwrap().push(format!("stop_plugin:{}", self.name));
        }
        fn start_instance(&self, instance_name: &str, _settings: &[(String, String)]) -> Result<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("start_instance:{}:{instance_name}", self.name));
            Ok(())
        }
        fn stop_instance(&self, instance_name: &str) {
            self.log
                .lock()
                .unwrap()
                .push(format!("stop_instance:{}:{instance_name}", self.name));
        }
    }

    #[test]
    fn start_is_post_order_stop_is_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut runtime = Runtime::new();
        runtime
            .register(Arc::new(Recording {
                name: "a".into(),
                log: log.clone(),
            }))
            .unwrap();
        runtime
            .register(Arc::new(Recording {
                name: "b".into(),
                log: log.clone(),
            }))
            .unwrap();

        let xml = r#"
            <Configuration name="demo">
              <Plugin name="a" file="builtin">
                <Instance name="a0"></Instance>
              </Plugin>
              <Plugin name="b" file="builtin">
                <Instance name="b0"></Instance>
              </Plugin>
            </Configuration>
        "#;
        let config = Configuration::parse(xml).unwrap();
        runtime.start(&config).unwrap();
        runtime.stop();

        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            vec![
                "start_plugin:a",
                "start_plugin:b",
                "start_instance:a:a0",
                "start_instance:b:b0",
                "stop_instance:b:b0",
                "stop_instance:a:a0",
                "stop_plugin:b",
                "stop_plugin:a",
            ]
        );
    }

    #[test]
    fn unregistered_plugin_name_fails_start() {
        let mut runtime = Runtime::new();
        let xml = r#"<Configuration name="demo"><Plugin name="missing" file="builtin"/></Configuration>"#;
        let config = Configuration::parse(xml).unwrap();
        let err = runtime.start(&config).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
