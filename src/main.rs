use anyhow::{Context, Result};
use clap::Parser;
use interpose::cli::{Cli, OutputFormat};
use interpose::config::TraceConfig;
use interpose::environment::{SandboxEnvironment, SharedWriter};
use interpose::filter::SelectorSet;
use interpose::formatting::inspect;
use interpose::json_output::JsonOutput;
use interpose::output::TextReporter;
use interpose::realm::Realm;
use interpose::script::Script;
use interpose::stats::StatsTracker;
use interpose::value::Throw;
use interpose::Tracer;
use std::cell::RefCell;
use std::fs;
use std::io;
use std::rc::Rc;
use termcolor::StandardStream;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Where traced calls end up
enum Reporter {
    Text(Rc<RefCell<TextReporter<StandardStream>>>),
    Json(Rc<RefCell<JsonOutput>>),
    Summary(Rc<RefCell<StatsTracker>>),
}

impl Reporter {
    fn finish(self, exit_code: i32) -> Result<()> {
        match self {
            Self::Text(reporter) => reporter.borrow_mut().finish()?,
            Self::Json(output) => {
                let mut output = output.borrow_mut();
                output.set_exit_code(exit_code);
                eprintln!("{}", output.to_json()?);
            }
            Self::Summary(stats) => stats.borrow().print_summary()?,
        }
        Ok(())
    }
}

fn load_config(args: &Cli) -> Result<TraceConfig> {
    let config = match &args.config {
        Some(path) => TraceConfig::from_file(path)?,
        None => TraceConfig::default(),
    };
    Ok(args.merge_into(config))
}

fn report_uncaught(thrown: &Throw) {
    let shown = match thrown.value().as_object() {
        Some(_) => thrown.to_string(),
        None => inspect(thrown.value()),
    };
    eprintln!("Uncaught {shown}");
}

fn main() -> Result<()> {
    let args = Cli::parse();

    // Initialize tracing if --debug flag is set
    init_tracing(args.debug);

    let config = load_config(&args)?;
    let print = SelectorSet::parse(&config.print)?;
    let options = config.into_options()?;
    tracing::debug!(?options, "options resolved");

    let source = fs::read_to_string(&args.script)
        .with_context(|| format!("Failed to read {}", args.script.display()))?;
    let script = Script::parse(&source)
        .with_context(|| format!("Failed to parse {}", args.script.display()))?;

    let realm = Realm::new();
    let stdout: SharedWriter = Rc::new(RefCell::new(io::stdout()));
    let stderr: SharedWriter = Rc::new(RefCell::new(io::stderr()));
    let mut argv = vec!["interpose".to_string(), args.script.display().to_string()];
    argv.extend(args.args.iter().cloned());
    let env = SandboxEnvironment::new(&realm, stdout, stderr, argv);

    let tracer = Tracer::new(options, &realm);
    let events = tracer.setup_hooks(&env)?;
    env.attach(&tracer);

    let reporter = match (args.summary, args.format) {
        (true, _) => Reporter::Summary(StatsTracker::new().subscribe(&events, print)),
        (false, OutputFormat::Json) => Reporter::Json(JsonOutput::new().subscribe(&events, print)),
        (false, OutputFormat::Text) => {
            let out = StandardStream::stderr(args.color.choice());
            Reporter::Text(TextReporter::new(out, print).subscribe(&events))
        }
    };

    let uncaught = match script.run(&realm) {
        Ok(_) => None,
        Err(thrown) => match env.fatal_exception(&thrown) {
            Ok(true) => None,
            Ok(false) => Some(thrown),
            Err(rethrown) => Some(rethrown),
        },
    };
    let exit_code = i32::from(uncaught.is_some());

    reporter.finish(exit_code)?;
    if let Some(thrown) = uncaught {
        report_uncaught(&thrown);
        std::process::exit(exit_code);
    }
    Ok(())
}
