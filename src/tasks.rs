//! The stock task table.
//!
//! | task          | prerequisites | does                                        |
//! |---------------|---------------|---------------------------------------------|
//! | `default`     | `styles`, `scripts`, `modernizr` | nothing else             |
//! | `watch:tasks` | `default`     | rebuilds scripts and styles on change       |
//! | `watch`       | `watch:tasks` | serves the output with live reload          |
//! | `styles`      |               | Sass, prefixes, `main.css`, `main.min.css`  |
//! | `scripts`     |               | bundles and transpiles into `bundle.js`     |
//! | `jshint`      |               | lints the scripts                           |
//! | `modernizr`   |               | custom Modernizr build from the outputs     |

use crate::config::Config;
use crate::error::RegistryError;
use crate::pipeline::{
    Autoprefix, Bundle, Dest, FeatureBuild, FeatureCrawl, Lint, MinifyCss, Pipeline, Rename, Sass,
    Size, Stream, Transpile, Uglify,
};
use crate::registry::Registry;
use crate::runner::Context;

/// Builds the registry of stock tasks.
pub fn registry() -> Result<Registry, RegistryError> {
    let mut registry = Registry::new();

    registry.group("default", ["styles", "scripts", "modernizr"])?;

    registry.register("watch:tasks", ["default"], |cx: &Context<'_>| {
        let src = &cx.config.paths.src;
        cx.watch([format!("{src}/scripts/**/*.js")], ["jshint", "scripts"])?;
        cx.watch([format!("{src}/styles/**/*.scss")], ["styles"])?;
        Ok(())
    })?;

    registry.register("watch", ["watch:tasks"], |cx: &Context<'_>| {
        cx.serve()?;
        cx.watch_reload(&cx.config.live.templates)?;
        Ok(())
    })?;

    registry.register("styles", [] as [&str; 0], |cx: &Context<'_>| {
        cx.pipe(&styles(cx.config)?)?;
        Ok(())
    })?;

    registry.register("scripts", [] as [&str; 0], |cx: &Context<'_>| {
        cx.pipe(&scripts(cx.config)?)?;
        Ok(())
    })?;

    registry.register("jshint", [] as [&str; 0], |cx: &Context<'_>| {
        cx.pipe(&jshint(cx.config)?)?;
        Ok(())
    })?;

    registry.register("modernizr", [] as [&str; 0], |cx: &Context<'_>| {
        cx.pipe(&modernizr(cx.config)?)?;
        Ok(())
    })?;

    Ok(registry)
}

/// Compiles the entry stylesheet into `main.css` and `main.min.css`.
pub fn styles(config: &Config) -> anyhow::Result<Pipeline> {
    let entry = config.paths.src_styles().join(&config.styles.entry);
    let dest = config.paths.dest_styles();

    Ok(Pipeline::src([entry])?
        .pipe(Sass::new())
        .pipe(Autoprefix::new(&config.styles.browsers)?)
        .pipe(Dest::new(&dest))
        .pipe(Stream)
        .pipe(Size::new().show_files())
        .pipe(MinifyCss::new())
        .pipe(Rename::suffix(".min"))
        .pipe(Size::new().show_files())
        .pipe(Dest::new(dest))
        .pipe(Stream))
}

/// Bundles the entry script and everything it requires into one file.
pub fn scripts(config: &Config) -> anyhow::Result<Pipeline> {
    let entry = config.paths.src_scripts().join(&config.scripts.entry);

    Ok(Pipeline::src([entry])?
        .pipe(Bundle::new(&config.paths.npm))
        .pipe(Transpile::new(&config.scripts.target))
        .pipe(Rename::to(&config.scripts.bundle))
        .pipe(Dest::new(config.paths.dest_scripts()))
        .pipe(Stream)
        .pipe(Size::new().show_files()))
}

pub fn jshint(config: &Config) -> anyhow::Result<Pipeline> {
    Ok(Pipeline::src(config.lint_sources())?.pipe(Lint::new(config.lint.config.clone())))
}

/// Custom Modernizr build covering the detects used by the built outputs.
pub fn modernizr(config: &Config) -> anyhow::Result<Pipeline> {
    let sources = [
        config.paths.dest_scripts().join(&config.scripts.bundle),
        config
            .paths
            .dest_styles()
            .join(config.styles.entry.with_extension("css")),
    ];

    Ok(Pipeline::src(sources)?
        .pipe(FeatureCrawl::new(&config.modernizr.options))
        .pipe(FeatureBuild::new(&config.modernizr.output))
        .pipe(Uglify)
        .pipe(Dest::new(config.paths.dest_scripts()))
        .pipe(Size::new().show_files()))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use camino::{Utf8Path, Utf8PathBuf};

    use super::*;
    use crate::runner::Runner;

    fn project() -> (tempfile::TempDir, Runner) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        let runner = Runner::new(registry().unwrap(), Config::default(), root);
        (dir, runner)
    }

    fn write(root: &Utf8Path, rel: &str, text: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    fn listing(dir: &Utf8Path) -> Vec<String> {
        let mut names: Vec<String> = match dir.read_dir_utf8() {
            Ok(entries) => entries
                .map(|entry| entry.unwrap().file_name().to_string())
                .collect(),
            Err(_) => Vec::new(),
        };
        names.sort();
        names
    }

    #[test]
    fn test_plans() {
        let registry = registry().unwrap();
        let plan = |name: &str| {
            registry
                .resolve(name)
                .unwrap()
                .into_iter()
                .map(|task| task.name().to_string())
                .collect::<Vec<_>>()
        };

        assert_eq!(plan("default"), ["styles", "scripts", "modernizr", "default"]);
        assert_eq!(
            plan("watch"),
            ["styles", "scripts", "modernizr", "default", "watch:tasks", "watch"]
        );
        assert_eq!(plan("jshint"), ["jshint"]);
    }

    #[test]
    fn test_styles_stages() {
        let pipeline = styles(&Config::default()).unwrap();

        assert_eq!(
            pipeline.stage_names().collect::<Vec<_>>(),
            [
                "src",
                "sass",
                "autoprefix",
                "dest",
                "stream",
                "size",
                "minify-css",
                "rename",
                "size",
                "dest",
                "stream"
            ]
        );
    }

    #[test]
    fn test_styles_writes_full_and_minified() {
        let (_dir, runner) = project();
        let root = runner.root().to_path_buf();
        write(&root, "src/styles/_vars.scss", "$gap: 4px;\n");
        write(
            &root,
            "src/styles/main.scss",
            "@import 'vars';\n.a {\n  display: flex;\n  .b { margin: $gap; }\n}\n",
        );

        let report = runner.run("styles").unwrap();
        assert!(report.is_success(), "{:?}", report.failed);

        let dest = root.join("public/styles");
        assert_eq!(listing(&dest), ["main.css", "main.min.css"]);

        let full = fs::read_to_string(dest.join("main.css")).unwrap();
        let min = fs::read_to_string(dest.join("main.min.css")).unwrap();
        assert!(full.contains(".a .b"));
        assert!(min.len() <= full.len());
    }

    #[test]
    fn test_styles_syntax_error_writes_nothing() {
        let (_dir, runner) = project();
        let root = runner.root().to_path_buf();
        write(&root, "src/styles/main.scss", ".a { color: red;\n");

        let report = runner.run("styles").unwrap();

        assert_eq!(report.failed.len(), 1);
        assert!(listing(&root.join("public/styles")).is_empty());
    }

    #[test]
    fn test_scripts_bundle() {
        if which::which("esbuild").is_err() {
            return;
        }

        let (_dir, runner) = project();
        let root = runner.root().to_path_buf();
        write(
            &root,
            "src/scripts/main.js",
            "var a = require('./a');\nconsole.log(a());\n",
        );
        write(
            &root,
            "src/scripts/a.js",
            "module.exports = function () {\n  return require('./b');\n};\n",
        );
        write(&root, "src/scripts/b.js", "module.exports = 2 ** 3;\n");

        assert!(runner.run("scripts").unwrap().is_success());

        let path = root.join("public/scripts/bundle.js");
        let first = fs::read(&path).unwrap();
        let text = String::from_utf8_lossy(&first);
        assert!(text.contains("console.log"));
        assert!(!text.contains("**"));

        assert!(runner.run("scripts").unwrap().is_success());
        assert_eq!(fs::read(&path).unwrap(), first);
    }

    #[test]
    fn test_scripts_missing_module_is_reported() {
        let (_dir, runner) = project();
        let root = runner.root().to_path_buf();
        write(&root, "src/scripts/main.js", "require('./missing');\n");

        let report = runner.run("scripts").unwrap();

        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].to_string().contains("Cannot find module"));
        assert!(!root.join("public/scripts/bundle.js").exists());
    }
}
