/*! XML-driven plugin/instance configuration.

Mirrors the shape of the original `configuration` tree — named plugins,
each owning named instances — but trades the C side's offset-based
`configurator_t` callback for a small trait: a [`Configurator`]
populates itself from a list of resolved `(name, value)` settings
handed to it by the loader, with unknown settings ignored and missing
mandatory ones failing the load.
*/

use std::collections::HashMap;

use roxmltree::Document;

use crate::error::{Error, Result};

/// The type a [`SettingDescriptor`] expects its value to parse as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingType {
    /// Signed integer.
    Int,
    /// Unsigned integer.
    Unsigned,
    /// A byte size, accepting `k`/`m`/`g` suffixes.
    Size,
    /// Opaque text, stored as-is.
    CString,
    /// One of the `log` crate's level names.
    DebugLevel,
    /// Owned string, same as `CString` but documents caller-retained
    /// ownership semantics in the original engine.
    OwnedString,
}

/// Describes one setting a [`Configurator`] accepts.
#[derive(Debug, Clone)]
pub struct SettingDescriptor {
    /// Setting name as it appears in `<Setting name="...">`.
    pub name: &'static str,
    /// Expected value type.
    pub ty: SettingType,
    /// Fails the load if the setting is absent.
    pub mandatory: bool,
}

/// A plugin or instance that can be populated from settings resolved
/// out of the configuration XML.
pub trait Configurator {
    /// The settings this configurator recognizes.
    fn settings(&self) -> &[SettingDescriptor];

    /// Apply one resolved setting. Called once per `<Setting>` element
    /// whose name matches an entry in [`Configurator::settings`].
    fn apply(&mut self, name: &str, value: &str) -> Result<()>;

    /// Called after every present setting has been applied, to check
    /// that all mandatory settings were supplied.
    fn validate(&self, seen: &[&str]) -> Result<()> {
        for descriptor in self.settings() {
            if descriptor.mandatory && !seen.contains(&descriptor.name) {
                return Err(Error::Config {
                    module: "config",
                    function: "validate",
                    message: "missing mandatory setting".into(),
                    parameter: descriptor.name.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// One `<Instance name="...">` node's resolved settings.
#[derive(Debug, Clone, Default)]
pub struct InstanceConfig {
    /// Instance name.
    pub name: String,
    /// Setting name → value, in document order.
    pub settings: Vec<(String, String)>,
}

/// One `<Plugin name="..." file="...">` node.
#[derive(Debug, Clone, Default)]
pub struct PluginConfig {
    /// Plugin name, used to look it up in the compile-time registry.
    pub name: String,
    /// Settings on the plugin node itself (as opposed to its
    /// instances).
    pub settings: Vec<(String, String)>,
    /// Instances declared under this plugin, in document order.
    pub instances: Vec<InstanceConfig>,
}

/// A fully parsed configuration document.
#[derive(Debug, Clone, Default)]
pub struct Configuration {
    /// Plugins, in document (= load) order.
    pub plugins: Vec<PluginConfig>,
}

impl Configuration {
    /// Parse the minimal XML shape this crate cares about:
    ///
    /// ```xml
    /// <Configuration name="...">
    ///   <Plugin name="ax25" file="...">
    ///     <Setting name="...">value</Setting>
    ///     <Instance name="1">
    ///       <Setting name="paclen">256</Setting>
    ///     </Instance>
    ///   </Plugin>
    /// </Configuration>
    /// ```
    ///
    /// This is intentionally narrower than a general XML configuration
    /// reader: only the elements this crate's plugin/instance model
    /// needs are recognized, everything else is ignored.
    pub fn parse(xml: &str) -> Result<Self> {
        let doc = Document::parse(xml).map_err(|e| Error::Config {
            module: "config",
            function: "parse",
            message: e.to_string(),
            parameter: "xml".into(),
        })?;
        let root = doc.root_element();
        let mut plugins = Vec::new();
        for plugin_node in root.children().filter(|n| n.has_tag_name("Plugin")) {
            let name = plugin_node
                .attribute("name")
                .ok_or_else(|| Error::Config {
                    module: "config",
                    function: "parse",
                    message: "Plugin element missing name attribute".into(),
                    parameter: "name".into(),
                })?
                .to_string();
            let mut settings = Vec::new();
            let mut instances = Vec::new();
            for child in plugin_node.children().filter(|n| n.is_element()) {
                if child.has_tag_name("Setting") {
                    settings.push(setting_from_node(child)?);
                } else if child.has_tag_name("Instance") {
                    let inst_name = child
                        .attribute("name")
                        .ok_or_else(|| Error::Config {
                            module: "config",
                            function: "parse",
                            message: "Instance element missing name attribute".into(),
                            parameter: "name".into(),
                        })?
                        .to_string();
                    let mut inst_settings = Vec::new();
                    for s in child.children().filter(|n| n.has_tag_name("Setting")) {
                        inst_settings.push(setting_from_node(s)?);
                    }
                    instances.push(InstanceConfig {
                        name: inst_name,
                        settings: inst_settings,
                    });
                }
            }
            plugins.push(PluginConfig {
                name,
                settings,
                instances,
            });
        }
        Ok(Configuration { plugins })
    }

    /// Look up a plugin node by name.
    pub fn plugin(&self, name: &str) -> Option<&PluginConfig> {
        self.plugins.iter().find(|p| p.name == name)
    }
}

fn setting_from_node(node: roxmltree::Node) -> Result<(String, String)> {
    let name = node
        .attribute("name")
        .ok_or_else(|| Error::Config {
            module: "config",
            function: "parse",
            message: "Setting element missing name attribute".into(),
            parameter: "name".into(),
        })?
        .to_string();
    let value = node.text().unwrap_or("").to_string();
    Ok((name, value))
}

/// Apply every setting in `settings` to `configurator`, then validate
/// that all mandatory settings were present. Unknown setting names are
/// silently ignored, matching the original engine's policy.
pub fn configure(configurator: &mut dyn Configurator, settings: &[(String, String)]) -> Result<()> {
    let known: HashMap<&str, SettingType> = configurator
        .settings()
        .iter()
        .map(|d| (d.name, d.ty))
        .collect();
    let mut seen = Vec::new();
    for (name, value) in settings {
        if known.contains_key(name.as_str()) {
            configurator.apply(name, value)?;
            seen.push(name.as_str());
        }
    }
    configurator.validate(&seen)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy {
        paclen: Option<u32>,
    }
    impl Configurator for Dummy {
        fn settings(&self) -> &[SettingDescriptor] {
            &[SettingDescriptor {
                name: "paclen",
                ty: SettingType::Unsigned,
                mandatory: true,
            }]
        }
        fn apply(&mut self, name: &str, value: &str) -> Result<()> {
            if name == "paclen" {
                self.paclen = Some(value.parse().map_err(|_| Error::Config {
                    module: "test",
                    function: "apply",
                    message: "not a number".into(),
                    parameter: "paclen".into(),
                })?);
            }
            Ok(())
        }
    }

    #[test]
    fn parses_nested_plugin_instance_settings() {
        let xml = r#"
            <Configuration name="demo">
              <Plugin name="ax25" file="builtin">
                <Setting name="mode">v2</Setting>
                <Instance name="radio0">
                  <Setting name="paclen">256</Setting>
                </Instance>
              </Plugin>
            </Configuration>
        "#;
        let conf = Configuration::parse(xml).unwrap();
        let plugin = conf.plugin("ax25").unwrap();
        assert_eq!(plugin.settings, vec![("mode".to_string(), "v2".to_string())]);
        assert_eq!(plugin.instances.len(), 1);
        assert_eq!(plugin.instances[0].name, "radio0");
    }

    #[test]
    fn unknown_setting_ignored_missing_mandatory_fails() {
        let mut dummy = Dummy { paclen: None };
        let err = configure(&mut dummy, &[("bogus".into(), "1".into())]).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn mandatory_setting_applied() {
        let mut dummy = Dummy { paclen: None };
        configure(&mut dummy, &[("paclen".into(), "512".into())]).unwrap();
        assert_eq!(dummy.paclen, Some(512));
    }
}
