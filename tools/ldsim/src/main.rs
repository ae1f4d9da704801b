use std::fs::File;
use std::io::BufWriter;
use std::process::ExitCode;

use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use log::info;
use rand::SeedableRng;
use rand::rngs::StdRng;

use ldsim_abstraction::Abstraction;
use ldsim_core::AbsBuilderAtomic;
use ldsim_core::AbsBuilderComposite;
use ldsim_core::AbsBuilderDefault;
use ldsim_core::AbsBuilderMas;
use ldsim_core::AbsBuilderMasSimulation;
use ldsim_core::AbsBuilderPdb;
use ldsim_core::AbstractionBuilder;
use ldsim_core::BuilderOptions;
use ldsim_core::DEFAULT_SEED;
use ldsim_core::LDSimulation;
use ldsim_core::LDSimulationOptions;
use ldsim_core::MergeStrategyKind;
use ldsim_core::MergeStrategyOptions;
use ldsim_core::ShrinkStrategyKind;
use ldsim_core::ShrinkStrategyOptions;
use ldsim_dominance::IntEpsilon;
use ldsim_dominance::LabelDominanceType;
use ldsim_dominance::NumericDominanceOptions;
use ldsim_dominance::SimulationType;
use ldsim_task::PlanningTask;
use ldsim_task::gripper_task;
use ldsim_task::random_task;
use ldsim_task::two_flip_task;
use ldsim_utilities::LdsimError;
use ldsim_utilities::MercError;
use ldsim_utilities::Timing;
use ldsim_utilities::VerbosityFlag;

#[derive(clap::Parser, Debug)]
#[command(
    name = "Maurice Laveaux",
    version,
    about = "A command line tool for label-dominance simulations of planning tasks"
)]
struct Cli {
    #[command(flatten)]
    verbosity: VerbosityFlag,

    #[command(subcommand)]
    commands: Option<Commands>,

    #[arg(long, global = true)]
    timings: bool,
}

/// Defines the subcommands for this tool.
#[derive(Debug, Subcommand)]
enum Commands {
    Simulate(SimulateArgs),
    Numeric(NumericArgs),
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TaskKind {
    TwoFlip,
    Gripper,
    Random,
}

/// Selects one of the generated tasks.
#[derive(clap::Args, Debug)]
struct TaskArgs {
    #[arg(long, value_enum, default_value_t = TaskKind::TwoFlip)]
    task: TaskKind,

    #[arg(long, default_value_t = 3, help = "Number of rooms of the gripper task")]
    rooms: usize,

    #[arg(long, default_value_t = 4, help = "Number of variables of the random task")]
    variables: usize,

    #[arg(long, default_value_t = 8, help = "Number of operators of the random task")]
    operators: usize,

    #[arg(long, default_value_t = DEFAULT_SEED, help = "Seed of the random task and of the computation")]
    seed: u64,
}

impl TaskArgs {
    fn create(&self) -> PlanningTask {
        match self.task {
            TaskKind::TwoFlip => two_flip_task(),
            TaskKind::Gripper => gripper_task(self.rooms.max(1)),
            TaskKind::Random => {
                let mut rng = StdRng::seed_from_u64(self.seed);
                random_task(&mut rng, self.variables.max(1), 3, self.operators, 3)
            }
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BuilderKind {
    Atomic,
    Pdb,
    MasSimulation,
    Mas,
    Default,
}

#[derive(clap::Args, Debug)]
#[command(about = "Builds abstractions of a generated task and computes their label-dominance simulation")]
struct SimulateArgs {
    #[command(flatten)]
    task: TaskArgs,

    #[arg(long, value_enum, default_value_t = BuilderKind::MasSimulation)]
    builder: BuilderKind,

    #[arg(long, value_enum, default_value_t = MergeStrategyKind::Linear)]
    merge: MergeStrategyKind,

    #[arg(long, value_enum)]
    shrink: Option<ShrinkStrategyKind>,

    #[arg(long, help = "Maximum number of states after shrinking")]
    max_states: Option<usize>,

    #[arg(long, default_value_t = 50000, help = "Maximum number of states of a product")]
    limit_merge: usize,

    #[arg(long, value_enum, default_value_t = SimulationType::Simple)]
    simulation_type: SimulationType,

    #[arg(long, value_enum, default_value_t = LabelDominanceType::Normal)]
    label_dominance_type: LabelDominanceType,

    #[arg(long, help = "Compute simulations after every merge, incrementally")]
    incremental_pruning: bool,

    #[arg(long, help = "Run the atomic builder first and keep its simulation")]
    from_atomic: bool,

    #[arg(long, default_value_t = 1400, help = "Time limit in seconds for all builders")]
    limit_seconds_total: u64,

    #[arg(long, help = "Dump the final simulation relations")]
    dump: bool,
}

#[derive(clap::Args, Debug)]
#[command(about = "Computes the numeric dominance relation on the atomic abstractions of a generated task")]
struct NumericArgs {
    #[command(flatten)]
    task: TaskArgs,

    #[arg(long, default_value_t = 10)]
    truncate_value: i32,

    #[arg(long, help = "Use epsilon credits for zero cost tau labels")]
    epsilon: bool,

    #[arg(long, help = "Labels that dominate noop are tau labels")]
    noop_tau: bool,

    #[arg(long, help = "Write the relation as JSON to this file")]
    output: Option<String>,

    #[arg(long, help = "Dump the numeric simulation relations")]
    dump: bool,
}

fn main() -> Result<ExitCode, MercError> {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.verbosity.log_level_filter())
        .parse_default_env()
        .init();

    let timing = Timing::new();

    if let Some(command) = cli.commands {
        let result = match command {
            Commands::Simulate(args) => simulate(&args, &timing),
            Commands::Numeric(args) => numeric(&args, &timing),
        };

        match result {
            Ok(()) => {}
            Err(error) if error.downcast_ref::<LdsimError>().is_some_and(LdsimError::is_unsolvable) => {
                println!("Task is unsolvable");
            }
            Err(error) => return Err(error),
        }
    }

    if cli.timings {
        timing.print();
    }

    Ok(ExitCode::SUCCESS)
}

fn create_builder(args: &SimulateArgs, options: BuilderOptions) -> Result<Box<dyn AbstractionBuilder>, LdsimError> {
    let merge_strategy = MergeStrategyOptions {
        kind: args.merge,
        ..Default::default()
    };
    let shrink_strategy = args.shrink.map(|kind| ShrinkStrategyOptions {
        kind,
        max_states: args.max_states,
        ..Default::default()
    });

    let builder: Box<dyn AbstractionBuilder> = match args.builder {
        BuilderKind::Atomic => Box::new(AbsBuilderAtomic { options }),
        BuilderKind::Pdb => Box::new(AbsBuilderPdb {
            options,
            limit_absstates_merge: args.limit_merge,
        }),
        BuilderKind::MasSimulation => Box::new(AbsBuilderMasSimulation {
            options,
            merge_strategy: Some(merge_strategy),
            shrink_strategy,
            limit_merge: args.limit_merge,
            simulation_type: args.simulation_type,
            label_dominance_type: args.label_dominance_type,
            incremental_pruning: args.incremental_pruning,
            ..Default::default()
        }),
        BuilderKind::Mas => Box::new(AbsBuilderMas {
            options,
            merge_strategy: Some(merge_strategy),
            shrink_strategy,
            ..Default::default()
        }),
        BuilderKind::Default => Box::new(AbsBuilderDefault {
            options,
            merge_strategy,
            limit_merge: args.limit_merge,
            ..Default::default()
        }),
    };

    if args.from_atomic {
        let atomic: Box<dyn AbstractionBuilder> = Box::new(AbsBuilderAtomic { options });
        Ok(Box::new(AbsBuilderComposite::new(vec![atomic, builder])?))
    } else {
        Ok(builder)
    }
}

fn simulate(args: &SimulateArgs, timing: &Timing) -> Result<(), MercError> {
    let task = args.task.create();
    info!(
        "Task with {} variables and {} operators",
        task.num_variables(),
        task.num_operators()
    );

    let options = BuilderOptions {
        dump: args.dump,
        limit_seconds_total: args.limit_seconds_total,
        seed: args.task.seed,
        ..Default::default()
    };
    let builder = create_builder(args, options)?;
    builder.dump_options();

    let mut time = timing.start("build");
    let mut ld_sim = None;
    let mut abstractions = Vec::new();
    builder.build_abstraction(&task, &options.budget(), &mut ld_sim, &mut abstractions)?;
    time.finish();

    let init = task.initial_state();
    if let Some(ld_sim) = &ld_sim {
        print_ld_simulation(ld_sim, init);
    }
    print_heuristics(&abstractions, init);
    Ok(())
}

fn print_ld_simulation(ld_sim: &LDSimulation, init: &[usize]) {
    println!("Abstractions: {}", ld_sim.abstractions().len());
    for abs in ld_sim.abstractions() {
        println!(
            "  {}: {} states, {} transitions",
            abs.description(),
            abs.size(),
            abs.total_transitions()
        );
    }
    println!("Useless variables: {:?}", ld_sim.useless_vars());
    println!(
        "Dead operators: {}",
        ld_sim.dead_operators().iter().filter(|&&dead| dead).count()
    );

    if let Some(relation) = ld_sim.dominance_relation() {
        println!("Simulations: {}", relation.num_simulations());
        println!("Equivalences: {}", relation.num_equivalences());
    }
    match ld_sim.get_cost(init) {
        Some(h) => println!("Heuristic value of the initial state: {h}"),
        None => println!("The initial state is pruned"),
    }
}

fn print_heuristics(abstractions: &[Abstraction], init: &[usize]) {
    if abstractions.is_empty() {
        return;
    }

    println!("Merge-and-shrink heuristics: {}", abstractions.len());
    for abs in abstractions {
        println!(
            "  {}: {} states, h(init) = {:?}",
            abs.description(),
            abs.size(),
            abs.get_cost(init)
        );
    }
}

fn numeric(args: &NumericArgs, timing: &Timing) -> Result<(), MercError> {
    let task = args.task.create();
    let mut options = NumericDominanceOptions {
        truncate_value: args.truncate_value,
        ..Default::default()
    };
    options.tau_labels.noop_dominance = args.noop_tau;

    let mut ld_sim = LDSimulation::new(
        &task,
        &LDSimulationOptions {
            seed: args.task.seed,
            ..Default::default()
        },
    );
    ld_sim.init_atomic_abstractions()?;

    let init = task.initial_state();
    let mut time = timing.start("numeric");
    if args.epsilon {
        let relation = ld_sim.compute_numeric_dominance_relation::<IntEpsilon>(options, args.dump)?;
        time.finish();

        println!("Minimal finite dominance value: {}", relation.get_minimal_finite_dominance_value());
        println!("Heuristic value of the initial state: {:?}", relation.get_cost(init));
    } else {
        let relation = ld_sim.compute_numeric_dominance_relation::<i32>(options, args.dump)?;
        time.finish();

        println!("Minimal finite dominance value: {}", relation.get_minimal_finite_dominance_value());
        println!("Heuristic value of the initial state: {:?}", relation.get_cost(init));

        if let Some(output) = &args.output {
            let writer = BufWriter::new(File::create(output)?);
            serde_json::to_writer(writer, &relation.strip(time.elapsed()))?;
        }
    }

    Ok(())
}
