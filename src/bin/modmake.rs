use anyhow::{bail, Context, Result};
use modmake::config::DEFAULT_TARGET;
use modmake::orchestrator::{self, Collaborators, RunOptions, SigningTools};
use modmake::pipeline::ConsoleReporter;
use modmake::tools::{
    EnvTestTarget, ProcessBackend, ProcessKeyCreator, ProcessSigner, Toolchain,
};
use modmake::BuildConfig;

fn usage() -> &'static str {
    "Usage:\n  \
     modmake [help] [force] [test] [release <version>] [target <name>] [key <name>]\n          \
     [module names ...]\n\n  \
     force             ignore the cache and build all targeted modules\n  \
     test              copy the built project to the local test target\n                    \
     (set MODMAKE_TEST_DIR to the install directory)\n  \
     release <version> archive the release directory as <project>-<version>.tar.zst\n  \
     target <name>     use the [<name>] table of make.toml instead of [make]\n  \
     key <name>        sign artifacts with <name>.privatekey, creating it if needed\n\n  \
     If module names are given, discovery is skipped and only those are built."
}

#[derive(Debug, Default)]
struct CliArgs {
    force: bool,
    test: bool,
    release: Option<String>,
    target: Option<String>,
    key: Option<String>,
    modules: Vec<String>,
}

fn parse_args(args: &[String]) -> Result<CliArgs> {
    let mut parsed = CliArgs::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "force" => parsed.force = true,
            "test" => parsed.test = true,
            "release" => {
                let version = iter
                    .next()
                    .with_context(|| format!("'release' requires a version\n{}", usage()))?;
                parsed.release = Some(version.clone());
            }
            "target" => {
                let name = iter
                    .next()
                    .with_context(|| format!("'target' requires a name\n{}", usage()))?;
                parsed.target = Some(name.clone());
            }
            "key" => {
                let name = iter
                    .next()
                    .with_context(|| format!("'key' requires a name\n{}", usage()))?;
                parsed.key = Some(name.clone());
            }
            // Anything else is an explicit module name.
            _ => parsed.modules.push(arg.clone()),
        }
    }
    Ok(parsed)
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args
        .iter()
        .any(|a| a == "help" || a == "-h" || a == "--help")
    {
        println!("{}", usage());
        return Ok(());
    }

    let cli = parse_args(&args)?;

    let root = std::env::current_dir().context("resolving current directory")?;
    let target = cli.target.as_deref().unwrap_or(DEFAULT_TARGET);
    let config = BuildConfig::load(&root, target)?;

    // CLI key wins over the configured one.
    let key_name = cli.key.clone().or_else(|| config.key.clone());

    let toolchain = Toolchain::resolve(&config, key_name.is_some())?;
    let backend = ProcessBackend::new(toolchain.packer.clone());
    let test_target = EnvTestTarget;

    let signer;
    let key_creator;
    let signing = match (&key_name, &toolchain.signer, &toolchain.key_tool) {
        (Some(name), Some(sign_tool), Some(key_tool)) => {
            signer = ProcessSigner::new(sign_tool.clone(), config.quiet);
            key_creator = ProcessKeyCreator::new(key_tool.clone(), config.quiet);
            Some(SigningTools {
                signer: &signer,
                key_creator: &key_creator,
                key_name: name.clone(),
            })
        }
        _ => None,
    };

    let options = RunOptions {
        force: cli.force,
        test: cli.test,
        release: cli.release,
        modules: cli.modules,
    };
    let collaborators = Collaborators {
        backend: &backend,
        signing,
        test_target: &test_target,
    };

    let mut reporter = ConsoleReporter;
    let counters = orchestrator::run(&config, &options, &collaborators, &mut reporter)?;

    if counters.failed > 0 {
        bail!("{} module(s) failed to build", counters.failed);
    }
    Ok(())
}
