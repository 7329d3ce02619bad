use std::error::Error;
use std::fs;
use std::io;
use std::path::Path;
use std::process;
use std::time::Instant;

use clap::{Arg, ArgAction, ArgMatches, Command};
use log::{error, info, warn};

use nymseek::csv_parser;
use nymseek::elicit::{self, ElicitOptions, RatingOracle};
use nymseek::mixture::MixtureModel;
use nymseek::search::SearchSettings;

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() {
    let matches = Command::new("nymseek")
        .version("0.1")
        .about("Cold-start group elicitation with a Monte Carlo tree search planner")
        .arg(
            Arg::new("means")
                .short('m')
                .long("means")
                .required(true)
                .value_name("mu.csv")
                .help("File containing per-group item rating means"),
        )
        .arg(
            Arg::new("variances")
                .short('s')
                .long("variances")
                .required(true)
                .value_name("sigma2.csv")
                .help("File containing per-group item rating variances"),
        )
        .arg(
            Arg::new("tries")
                .short('t')
                .long("tries")
                .default_value("1000")
                .value_parser(clap::value_parser!(usize))
                .help("Number of cold-start runs per group, averaged for the success rates"),
        )
        .arg(
            Arg::new("max-count")
                .short('n')
                .long("max-count")
                .default_value("25")
                .value_parser(clap::value_parser!(usize))
                .help("Number of items each user is asked to rate"),
        )
        .arg(
            Arg::new("rollouts")
                .short('r')
                .long("rollouts")
                .default_value("1")
                .value_parser(clap::value_parser!(usize))
                .help("Number of rollouts per simulation, multiplied by the group count"),
        )
        .arg(
            Arg::new("lookahead")
                .short('l')
                .long("lookahead")
                .default_value("1")
                .value_parser(clap::value_parser!(usize))
                .help("Maximum tree depth; also sets the rollout length to one less"),
        )
        .arg(
            Arg::new("user-ratings")
                .short('u')
                .long("user-ratings")
                .value_name("ratings_N.csv")
                .help("Replay pre-recorded user ratings instead of sampling the mixture"),
        )
        .arg(
            Arg::new("first-item")
                .short('f')
                .long("first-item")
                .value_parser(clap::value_parser!(usize))
                .help("Item every user is asked to rate first"),
        )
        .arg(
            Arg::new("no-montecarlo")
                .short('c')
                .action(ArgAction::SetTrue)
                .help("Disable Monte Carlo rollouts and use the one-step mean-rating planner"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Enable debug output"),
        )
        .get_matches();

    if let Err(err) = init_logger(matches.get_flag("verbose")) {
        eprintln!("failed to initialise logging: {}", err);
        process::exit(1);
    }
    if let Err(err) = run(&matches) {
        error!("{}", err);
        process::exit(1);
    }
}

fn init_logger(verbose: bool) -> Result<(), fern::InitError> {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}] {}",
                chrono::Local::now().format("%H:%M:%S"),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(io::stderr())
        .apply()?;
    Ok(())
}

fn run(matches: &ArgMatches) -> Result<(), Box<dyn Error>> {
    let mu_path = Path::new(
        matches
            .get_one::<String>("means")
            .ok_or("missing means file")?,
    );
    let sigma2_path = Path::new(
        matches
            .get_one::<String>("variances")
            .ok_or("missing variances file")?,
    );

    let mu = csv_parser::read_matrix(mu_path)?;
    info!(
        "read {}: {} groups, {} items",
        mu_path.display(),
        mu.num_rows(),
        mu.num_cols
    );
    let sigma2 = csv_parser::read_matrix(sigma2_path)?;
    let mixture = MixtureModel::new(&mu.rows, &sigma2.rows)?;

    let max_lookahead = *matches.get_one::<usize>("lookahead").unwrap_or(&1);
    let search = SearchSettings::default()
        .with_max_count(*matches.get_one::<usize>("max-count").unwrap_or(&25))
        .with_num_rollouts(*matches.get_one::<usize>("rollouts").unwrap_or(&1))
        .with_lookahead(max_lookahead);
    let search = if matches.get_flag("no-montecarlo") {
        search.without_montecarlo()
    } else {
        search
    };
    let options = ElicitOptions {
        tries: *matches.get_one::<usize>("tries").unwrap_or(&1000),
        first_item: matches.get_one::<usize>("first-item").copied(),
        search,
        seed: None,
    };

    if options.search.max_count > mixture.num_items() {
        return Err(format!(
            "cannot elicit {} ratings, the model only has {} items",
            options.search.max_count,
            mixture.num_items()
        )
        .into());
    }
    if let Some(first_item) = options.first_item {
        if first_item >= mixture.num_items() {
            return Err(format!(
                "first item {} is out of range, the model has {} items",
                first_item,
                mixture.num_items()
            )
            .into());
        }
    }

    let panel = matches
        .get_one::<String>("user-ratings")
        .map(|path| {
            csv_parser::read_ratings_panel(
                Path::new(path),
                mixture.num_groups(),
                mixture.num_items(),
            )
        })
        .transpose()?;
    if let Some(panel) = &panel {
        if options.tries > panel.samples_per_group {
            return Err(format!(
                "{} tries requested but the ratings panel only has {} users per group",
                options.tries, panel.samples_per_group
            )
            .into());
        }
    }
    let oracle = match &panel {
        Some(panel) => RatingOracle::Panel(panel),
        None => RatingOracle::Sampled,
    };

    info!(
        "settings: tries {}, max count {}, rollouts {}, lookahead {}, rollout items {}, first item {:?}, monte carlo {}",
        options.tries,
        options.search.max_count,
        options.search.num_rollouts,
        options.search.max_lookahead,
        options.search.max_rollout_items,
        options.first_item,
        options.search.use_montecarlo,
    );

    let start = Instant::now();
    let report = elicit::elicit_all_groups(&mixture, oracle, &options);
    info!("time taken {:.3} sec", start.elapsed().as_secs_f64());

    if let Err(err) = fs::create_dir("output") {
        if err.kind() != io::ErrorKind::AlreadyExists {
            warn!("could not create output directory: {}", err);
        }
    }

    println!("group/success rate:");
    for (group, rate) in report.success_rates.iter().enumerate() {
        println!("{:4} {:.4}", group, rate);
    }
    println!("mean={:.4}", report.mean());
    Ok(())
}
