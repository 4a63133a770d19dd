//! Environment module for definition files
//!
//! Gives `deploy.lua` read access to variables chosen by the caller, so an
//! account id or a GitHub owner can be injected without editing the file.
//! The CLI backs it with the process environment.

use crate::module::DefinitionModule;
use mlua::prelude::*;

/// Source of variables visible to a definition
pub trait VarProvider: Send + Sync {
    /// Value of `name`, if set
    fn get(&self, name: &str) -> Option<String>;

    /// Every variable name `env.all()` and `env.keys()` should list
    fn keys(&self) -> Vec<String>;
}

/// Environment module, generic over where variables come from
pub struct EnvModule<V: VarProvider> {
    provider: std::sync::Arc<std::sync::Mutex<V>>,
}

impl<V: VarProvider> EnvModule<V> {
    pub fn new(provider: V) -> Self {
        Self {
            provider: std::sync::Arc::new(std::sync::Mutex::new(provider)),
        }
    }
}

fn lock_error<E: std::fmt::Display>(e: E) -> LuaError {
    LuaError::RuntimeError(format!("Failed to lock provider: {}", e))
}

impl<V: VarProvider + 'static> DefinitionModule for EnvModule<V> {
    fn id(&self) -> &'static str {
        "env"
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        let env_table = lua.create_table()?;

        // env.get(name, default?)
        {
            let provider = self.provider.clone();
            env_table.set(
                "get",
                lua.create_function(move |_, (name, default): (String, Option<String>)| {
                    let value = provider.lock().map_err(lock_error)?.get(&name);
                    Ok(value.or(default))
                })?,
            )?;
        }

        // env.require(name)
        {
            let provider = self.provider.clone();
            env_table.set(
                "require",
                lua.create_function(move |_, name: String| {
                    provider
                        .lock()
                        .map_err(lock_error)?
                        .get(&name)
                        .ok_or_else(|| {
                            LuaError::RuntimeError(format!(
                                "Required environment variable '{}' is not set",
                                name
                            ))
                        })
                })?,
            )?;
        }

        // env.has(name)
        {
            let provider = self.provider.clone();
            env_table.set(
                "has",
                lua.create_function(move |_, name: String| {
                    Ok(provider.lock().map_err(lock_error)?.get(&name).is_some())
                })?,
            )?;
        }

        // env.all()
        {
            let provider = self.provider.clone();
            env_table.set(
                "all",
                lua.create_function(move |lua, ()| {
                    let table = lua.create_table()?;
                    let provider = provider.lock().map_err(lock_error)?;
                    for key in provider.keys() {
                        if let Some(value) = provider.get(&key) {
                            table.set(key.as_str(), value.as_str())?;
                        }
                    }
                    Ok(table)
                })?,
            )?;
        }

        // env.keys()
        {
            let provider = self.provider.clone();
            env_table.set(
                "keys",
                lua.create_function(move |lua, ()| {
                    let keys = provider.lock().map_err(lock_error)?.keys();
                    lua.create_sequence_from(keys)
                })?,
            )?;
        }

        lua.globals().set(self.id(), env_table)?;
        Ok(())
    }

    fn stubs(&self) -> String {
        r#"---@meta

---Read-only access to variables supplied by the dockyard CLI
---@class env
env = {}

---Get a variable, falling back to `default` when it is not set
---@param name string
---@param default? string
---@return string?
---
---@usage
---local account = env.get("AWS_ACCOUNT", "123456789012")
function env.get(name, default) end

---Get a variable, raising an error when it is not set
---@param name string
---@return string
function env.require(name) end

---Check whether a variable is set
---@param name string
---@return boolean
function env.has(name) end

---All visible variables as a name -> value table
---@return table<string, string>
function env.all() end

---Names of all visible variables
---@return string[]
function env.keys() end
"#
        .to_string()
    }

    fn metadata(&self) -> crate::module::ModuleMetadata {
        crate::module::ModuleMetadata {
            id: self.id(),
            version: "1.0.0",
            description: "Variable access for deployment definitions",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct TestVarProvider {
        vars: HashMap<String, String>,
    }

    impl TestVarProvider {
        fn new(vars: &[(&str, &str)]) -> Self {
            Self {
                vars: vars
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            }
        }
    }

    impl VarProvider for TestVarProvider {
        fn get(&self, name: &str) -> Option<String> {
            self.vars.get(name).cloned()
        }

        fn keys(&self) -> Vec<String> {
            let mut keys: Vec<String> = self.vars.keys().cloned().collect();
            keys.sort();
            keys
        }
    }

    fn lua_with(vars: &[(&str, &str)]) -> Lua {
        let lua = Lua::new();
        EnvModule::new(TestVarProvider::new(vars))
            .register(&lua)
            .unwrap();
        lua
    }

    #[test]
    fn test_get_with_default() {
        let lua = lua_with(&[("AWS_ACCOUNT", "123456789012")]);

        let account: String = lua.load(r#"return env.get("AWS_ACCOUNT")"#).eval().unwrap();
        assert_eq!(account, "123456789012");

        let region: String = lua
            .load(r#"return env.get("AWS_REGION", "us-east-1")"#)
            .eval()
            .unwrap();
        assert_eq!(region, "us-east-1");

        let missing: Option<String> = lua.load(r#"return env.get("MISSING")"#).eval().unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_require_missing_fails() {
        let lua = lua_with(&[]);
        let result: LuaResult<String> = lua.load(r#"return env.require("GITHUB_OWNER")"#).eval();
        let err = result.unwrap_err().to_string();
        assert!(err.contains("GITHUB_OWNER"));
    }

    #[test]
    fn test_has_and_keys() {
        let lua = lua_with(&[("A", "1"), ("B", "2")]);

        let has: bool = lua.load(r#"return env.has("A")"#).eval().unwrap();
        assert!(has);
        let has: bool = lua.load(r#"return env.has("C")"#).eval().unwrap();
        assert!(!has);

        let keys: Vec<String> = lua.load("return env.keys()").eval().unwrap();
        assert_eq!(keys, vec!["A", "B"]);

        let b: String = lua.load("return env.all().B").eval().unwrap();
        assert_eq!(b, "2");
    }
}
