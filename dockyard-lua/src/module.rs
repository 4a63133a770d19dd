use mlua::prelude::*;

/// Trait for Lua modules available to definition files.
///
/// Each module exposes one global table to `deploy.lua`. Modules must have a
/// unique identifier and provide Lua Language Server stubs so editors can
/// complete the API.
///
/// # Example
///
/// ```rust
/// use dockyard_lua::module::DefinitionModule;
/// use mlua::prelude::*;
///
/// struct RegionModule;
///
/// impl DefinitionModule for RegionModule {
///     fn id(&self) -> &'static str {
///         "region"
///     }
///
///     fn register(&self, lua: &Lua) -> LuaResult<()> {
///         let table = lua.create_table()?;
///         table.set("default", "us-east-1")?;
///         lua.globals().set(self.id(), table)?;
///         Ok(())
///     }
///
///     fn stubs(&self) -> String {
///         "---@meta\n---@class region\nregion = {}\n".to_string()
///     }
/// }
/// ```
pub trait DefinitionModule: Send + Sync {
    /// Returns the unique identifier for this module.
    ///
    /// Used as the global variable name in Lua, so it must be a valid Lua
    /// identifier and unique across all registered modules.
    fn id(&self) -> &'static str;

    /// Registers this module's functions and values into the Lua context.
    ///
    /// # Errors
    /// Returns `LuaError` if registration fails
    fn register(&self, lua: &Lua) -> LuaResult<()>;

    /// Generates Lua Language Server stubs for this module.
    ///
    /// The stub should start with `---@meta` to mark it as a definition file.
    fn stubs(&self) -> String;

    /// Optional module metadata
    fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata {
            id: self.id(),
            version: "0.1.0",
            description: "",
        }
    }
}

/// Metadata about a definition module
#[derive(Debug, Clone)]
pub struct ModuleMetadata {
    pub id: &'static str,
    pub version: &'static str,
    pub description: &'static str,
}

/// Registry for managing definition modules
///
/// The CLI fills one with the modules a definition may use and loads them into
/// the sandbox before evaluating `deploy.lua`.
pub struct ModuleRegistry {
    modules: Vec<Box<dyn DefinitionModule>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
        }
    }

    /// Registers a module
    ///
    /// # Panics
    /// Panics if a module with the same ID is already registered
    pub fn register<M: DefinitionModule + 'static>(&mut self, module: M) {
        let id = module.id();
        if self.modules.iter().any(|m| m.id() == id) {
            panic!("Module with id '{}' is already registered", id);
        }
        self.modules.push(Box::new(module));
    }

    /// Registered modules, in registration order
    pub fn modules(&self) -> &[Box<dyn DefinitionModule>] {
        &self.modules
    }

    /// Registers all modules into a Lua context
    ///
    /// # Errors
    /// Returns the first error encountered during registration
    pub fn register_all(&self, lua: &Lua) -> LuaResult<()> {
        for module in &self.modules {
            module.register(lua)?;
        }
        Ok(())
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
