//! Lua sandbox creation
//!
//! Definitions are evaluated in a restricted Lua state: no filesystem, no
//! process access, no loading of other files. The `app` helper module is
//! always present; `log` and `env` are registered by the caller through a
//! [`ModuleRegistry`](crate::module::ModuleRegistry).

use mlua::{Lua, LuaOptions, Result as LuaResult, StdLib, Table};

/// Create a restricted Lua sandbox
///
/// Only the table, string, math and utf8 libraries are loaded. `require`,
/// `dofile`, `loadfile` and `load` are removed.
///
/// # Example
/// ```no_run
/// use dockyard_lua::sandbox::create_sandbox;
///
/// let lua = create_sandbox()?;
/// let definition: mlua::Table = lua
///     .load(r#"return app.define({ name = "hello" })"#)
///     .eval()?;
/// let name: String = definition.get("name")?;
/// assert_eq!(name, "hello");
/// # Ok::<(), mlua::Error>(())
/// ```
pub fn create_sandbox() -> LuaResult<Lua> {
    // SAFETY: none of the loaded libraries can reach the C API or native code
    let lua = unsafe {
        Lua::unsafe_new_with(
            StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8,
            LuaOptions::default(),
        )
    };

    let globals = lua.globals();
    for name in ["require", "dofile", "loadfile", "load"] {
        globals.set(name, mlua::Nil)?;
    }

    register_app_module(&lua)?;

    Ok(lua)
}

/// Register the `app` helper module
///
/// The helpers only shape tables; all validation happens after the
/// definition has been read back into Rust.
fn register_app_module(lua: &Lua) -> LuaResult<()> {
    let app = lua.create_table()?;

    // app.define(definition)
    app.set(
        "define",
        lua.create_function(|_, definition: Table| Ok(definition))?,
    )?;

    // app.source(owner, repo, token_secret?)
    app.set(
        "source",
        lua.create_function(
            |lua, (owner, repo, token_secret): (String, String, Option<String>)| {
                let source = lua.create_table()?;
                source.set("owner", owner)?;
                source.set("repo", repo)?;
                if let Some(secret) = token_secret {
                    source.set("token_secret", secret)?;
                }
                Ok(source)
            },
        )?,
    )?;

    // app.branch(pattern, tag)
    app.set(
        "branch",
        lua.create_function(|lua, (pattern, tag): (String, String)| {
            let rule = lua.create_table()?;
            rule.set("pattern", pattern)?;
            rule.set("tag", tag)?;
            Ok(rule)
        })?,
    )?;

    // app.environment(name, config)
    app.set(
        "environment",
        lua.create_function(|_, (name, config): (String, Table)| {
            config.set("name", name)?;
            Ok(config)
        })?,
    )?;

    lua.globals().set("app", app)?;

    Ok(())
}

/// LuaLS stubs for the `app` helper module
pub fn app_stubs() -> String {
    r#"---@meta

---@class GitSource
---@field owner string
---@field repo string
---@field token_secret? string Secrets Manager secret holding the GitHub token

---@class InfraSource: GitSource
---@field branch string Branch the meta-pipeline tracks

---@class BranchRule
---@field pattern string Regular expression matched against the branch name
---@field tag string Image tag published for matching branches

---@class Environment
---@field name string
---@field tag string Image tag this environment deploys
---@field cidr string VPC CIDR block, /16 to /24
---@field desired_count? integer Tasks to run, default 1

---@class Container
---@field cpu? integer CPU units, default 256
---@field memory? integer Memory in MiB, default 512
---@field port? integer Container port, default 3000
---@field log_retention_days? integer Default 7

---@class AppDefinition
---@field name string
---@field account string 12-digit AWS account id
---@field region string
---@field registry? string Registry repository name, defaults to `name`
---@field source GitSource Application repository
---@field infra InfraSource Infrastructure repository
---@field container? Container
---@field branches BranchRule[] Evaluated in order, the last match wins
---@field environments Environment[]

---Helpers for writing deploy.lua
---@class app
app = {}

---Mark the table returned by deploy.lua
---@param definition AppDefinition
---@return AppDefinition
function app.define(definition) end

---Describe a GitHub repository
---@param owner string
---@param repo string
---@param token_secret? string
---@return GitSource
function app.source(owner, repo, token_secret) end

---Map branches matching `pattern` to the image tag `tag`
---@param pattern string
---@param tag string
---@return BranchRule
function app.branch(pattern, tag) end

---Describe an environment
---@param name string
---@param config { tag: string, cidr: string, desired_count?: integer }
---@return Environment
function app.environment(name, config) end
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_basic_lua() {
        let lua = create_sandbox().unwrap();

        let result: i32 = lua
            .load(
                r#"
                local t = {a = 1, b = 2}
                return t.a + t.b
            "#,
            )
            .eval()
            .unwrap();
        assert_eq!(result, 3);

        let result: String = lua.load(r#"return string.upper("prod")"#).eval().unwrap();
        assert_eq!(result, "PROD");
    }

    #[test]
    fn test_sandbox_no_io() {
        let lua = create_sandbox().unwrap();

        let has_io: bool = lua.load(r#"return io ~= nil"#).eval().unwrap();
        assert!(!has_io);

        let has_os: bool = lua.load(r#"return os ~= nil"#).eval().unwrap();
        assert!(!has_os);
    }

    #[test]
    fn test_sandbox_no_loading() {
        let lua = create_sandbox().unwrap();

        assert!(lua.load(r#"require("os")"#).exec().is_err());
        assert!(lua.load(r#"dofile("deploy.lua")"#).exec().is_err());
        assert!(lua.load(r#"load("return 1")()"#).exec().is_err());
    }

    #[test]
    fn test_sandbox_no_modules_by_default() {
        let lua = create_sandbox().unwrap();

        let has_log: bool = lua.load(r#"return log ~= nil"#).eval().unwrap();
        assert!(!has_log);
        let has_env: bool = lua.load(r#"return env ~= nil"#).eval().unwrap();
        assert!(!has_env);
    }

    #[test]
    fn test_app_helpers() {
        let lua = create_sandbox().unwrap();

        let (pattern, tag): (String, String) = lua
            .load(
                r#"
                local rule = app.branch("^release/.*$", "staging")
                return rule.pattern, rule.tag
            "#,
            )
            .eval()
            .unwrap();
        assert_eq!(pattern, "^release/.*$");
        assert_eq!(tag, "staging");

        let (owner, secret): (String, Option<String>) = lua
            .load(
                r#"
                local src = app.source("acme", "hello-app")
                return src.owner, src.token_secret
            "#,
            )
            .eval()
            .unwrap();
        assert_eq!(owner, "acme");
        assert!(secret.is_none());

        let name: String = lua
            .load(
                r#"
                local env = app.environment("prod", { tag = "prod", cidr = "10.0.0.0/16" })
                return env.name
            "#,
            )
            .eval()
            .unwrap();
        assert_eq!(name, "prod");
    }

    #[test]
    fn test_app_stubs() {
        let stubs = app_stubs();
        assert!(stubs.starts_with("---@meta"));
        assert!(stubs.contains("function app.branch(pattern, tag) end"));
    }
}
