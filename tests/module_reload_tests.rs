//! Integration tests for addon code units.
//!
//! Exercises loading and hot reloading of Lua entry files through the
//! `Addon` API, including units pulled in transitively with `require`.

mod common;

use std::fs;

use tempfile::TempDir;

use common::{FakePackageManager, write_addon, write_file};
use relative_addons::addon::LoadedModule;
use relative_addons::{Addon, AddonError};

const DESCRIPTOR: &str = r#"{"name": "greeter", "version": "1.4.0"}"#;

fn exported(module: &LoadedModule, key: &str) -> String {
    module
        .exports()
        .as_table()
        .expect("exports table")
        .get::<String>(key)
        .expect("export")
}

fn open(dir: &TempDir) -> (Addon, std::path::PathBuf) {
    let path = write_addon(dir.path(), "greeter", DESCRIPTOR);
    let (_, services) = FakePackageManager::shared(&[]);
    (Addon::open(&path, services).expect("open"), path)
}

// ============================================================================
// Loading
// ============================================================================

mod loading {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_entry_sees_addon_table() {
        let dir = TempDir::new().expect("temp dir");
        let (mut addon, path) = open(&dir);
        write_file(
            &path,
            "init.lua",
            r#"
            addon.log("starting " .. addon.name)
            return { label = addon.name .. "@" .. addon.version }
            "#,
        );

        let module = addon.module().expect("load");
        assert_eq!(exported(module, "label"), "greeter@1.4.0");
        assert_eq!(module.identifier(), "greeter");
        assert_eq!(module.executions(), 1);
    }

    #[test]
    fn test_load_twice_does_not_reexecute() {
        let dir = TempDir::new().expect("temp dir");
        let (mut addon, path) = open(&dir);
        write_file(&path, "init.lua", "return { text = 'first' }");

        addon.module().expect("load");
        write_file(&path, "init.lua", "return { text = 'second' }");
        let module = addon.module().expect("load again");

        assert_eq!(exported(module, "text"), "first");
        assert_eq!(module.executions(), 1);
    }

    #[test]
    fn test_load_failure_leaves_addon_usable() {
        let dir = TempDir::new().expect("temp dir");
        let (mut addon, path) = open(&dir);
        write_file(&path, "init.lua", "local x = require('does_not_exist')");

        assert!(matches!(addon.module(), Err(AddonError::ModuleLoad(_))));
        assert_eq!(addon.name().expect("name"), "greeter");
        addon.enable().expect("enable");

        write_file(&path, "init.lua", "return { text = 'fixed' }");
        assert_eq!(exported(addon.module().expect("load"), "text"), "fixed");
    }
}

// ============================================================================
// Reloading
// ============================================================================

mod reloading {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_reload_picks_up_transitive_edits() {
        let dir = TempDir::new().expect("temp dir");
        let (mut addon, path) = open(&dir);
        write_file(
            &path,
            "init.lua",
            "local fmt = require('lib.format')\nreturn { text = fmt.greet('world') }",
        );
        write_file(
            &path,
            "lib/format.lua",
            "local words = require('lib.words')\n\
             return { greet = function(who) return words.hello .. ', ' .. who end }",
        );
        write_file(&path, "lib/words.lua", "return { hello = 'hello' }");

        let module = addon.module().expect("load");
        assert_eq!(exported(module, "text"), "hello, world");
        assert_eq!(module.dependencies(), ["lib.format", "lib.words"]);

        write_file(&path, "lib/words.lua", "return { hello = 'hi' }");
        let module = addon.reload_module().expect("reload");
        assert_eq!(exported(module, "text"), "hi, world");
        assert_eq!(module.executions(), 2);
    }

    #[test]
    fn test_reload_drops_units_no_longer_required() {
        let dir = TempDir::new().expect("temp dir");
        let (mut addon, path) = open(&dir);
        write_file(&path, "helper.lua", "return {}");
        write_file(&path, "init.lua", "require('helper')\nreturn {}");

        assert_eq!(addon.module().expect("load").dependencies(), ["helper"]);

        write_file(&path, "init.lua", "return {}");
        let module = addon.reload_module().expect("reload");
        assert!(module.dependencies().is_empty());
    }

    #[test]
    fn test_reload_without_load() {
        let dir = TempDir::new().expect("temp dir");
        let (mut addon, path) = open(&dir);
        write_file(&path, "init.lua", "return { text = 'ok' }");

        let module = addon.reload_module().expect("reload");
        assert_eq!(module.executions(), 2);
        assert_eq!(exported(module, "text"), "ok");
    }

    #[test]
    fn test_failed_reload_keeps_last_good_exports() {
        let dir = TempDir::new().expect("temp dir");
        let (mut addon, path) = open(&dir);
        write_file(&path, "init.lua", "return { text = 'good' }");
        addon.module().expect("load");

        write_file(&path, "init.lua", "return {");
        assert!(matches!(
            addon.reload_module(),
            Err(AddonError::ModuleLoad(_))
        ));
        assert_eq!(exported(addon.module().expect("still loaded"), "text"), "good");
    }
}

// ============================================================================
// Removal
// ============================================================================

mod removal {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_remove_runs_unload_hook_first() {
        let dir = TempDir::new().expect("temp dir");
        let (mut addon, path) = open(&dir);
        write_file(
            &path,
            "init.lua",
            r#"
            local marker = addon.path .. "/../unloaded.marker"
            function on_unload()
                local f = assert(io.open(marker, "w"))
                f:write(addon.name)
                f:close()
            end
            "#,
        );

        addon.module().expect("load");
        addon.remove().expect("remove");

        assert!(!path.exists());
        assert_eq!(
            fs::read_to_string(dir.path().join("unloaded.marker")).expect("marker"),
            "greeter"
        );
    }
}
