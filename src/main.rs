use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use clap::{Arg, ArgMatches, Command};
use rescuesim::learning::{IMissionStore, JsonlMissionStore, LearningHints, MemoryMissionStore, MissionStatistics};
use rescuesim::logging::{ensure_log_directory, init_logging, parse_log_level, LogConfig, LogOutput};
use rescuesim::models::Mission;
use rescuesim::rng::derive_seed;
use rescuesim::scenario::ScenarioConfig;
use rescuesim::simulation::{FrameRecorder, MissionController};

/// 実行オプション
struct RunOptions {
    iterations: u32,
    until_success: bool,
    max_iterations: u32,
    agents: Option<u32>,
    history: Option<String>,
    stats_only: bool,
    batch: Option<u32>,
    frames: Option<String>,
    verbose_level: u8,
}

impl RunOptions {
    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            iterations: matches.get_one::<u32>("iterations").copied().unwrap_or(1),
            until_success: matches.get_flag("until-success"),
            max_iterations: matches.get_one::<u32>("max-iterations").copied().unwrap_or(50),
            agents: matches.get_one::<u32>("agents").copied(),
            history: matches.get_one::<String>("history").cloned(),
            stats_only: matches.get_flag("stats-only"),
            batch: matches.get_one::<u32>("batch").copied(),
            frames: matches.get_one::<String>("frames").cloned(),
            verbose_level: matches.get_count("verbose"),
        }
    }
}

fn main() {
    // コマンドライン引数の解析
    let matches = Command::new("rescuesim")
        .version("0.1.0")
        .about("救助シミュレーション (Rescue Simulation)")
        .long_about("多層建物内の救助エージェントシミュレーション\n\
                     火災・襲撃者などの危険源の中で救助目標への到達可否を評価し、\n\
                     過去のミッション記録から次の試行の行動を調整します。")
        .arg(
            Arg::new("scenario")
                .short('s')
                .long("scenario")
                .value_name("FILE")
                .help("シナリオファイル(.yaml)のパスを指定")
        )
        .arg(
            Arg::new("info")
                .short('i')
                .long("info")
                .action(clap::ArgAction::SetTrue)
                .help("シナリオの情報のみ表示して終了")
        )
        .arg(
            Arg::new("iterations")
                .short('n')
                .long("iterations")
                .value_name("N")
                .value_parser(clap::value_parser!(u32).range(1..))
                .default_value("1")
                .help("学習を挟みながら実行するミッション数")
        )
        .arg(
            Arg::new("until-success")
                .long("until-success")
                .action(clap::ArgAction::SetTrue)
                .conflicts_with("iterations")
                .help("救助に成功するまでミッションを繰り返す")
        )
        .arg(
            Arg::new("max-iterations")
                .long("max-iterations")
                .value_name("N")
                .value_parser(clap::value_parser!(u32).range(1..))
                .default_value("50")
                .help("--until-success 時の最大試行回数")
        )
        .arg(
            Arg::new("agents")
                .short('a')
                .long("agents")
                .value_name("N")
                .value_parser(clap::value_parser!(u32).range(1..))
                .help("エージェント数（シナリオの設定を上書き）")
        )
        .arg(
            Arg::new("history")
                .long("history")
                .value_name("FILE")
                .help("ミッション記録ファイル(.jsonl)。省略時はメモリ上のみ")
        )
        .arg(
            Arg::new("stats-only")
                .long("stats-only")
                .action(clap::ArgAction::SetTrue)
                .requires("history")
                .help("ミッション記録の統計のみ表示して終了")
        )
        .arg(
            Arg::new("batch")
                .long("batch")
                .value_name("N")
                .value_parser(clap::value_parser!(u32).range(1..))
                .conflicts_with_all(["until-success", "frames"])
                .help("異なるシードのミッションをN件並列実行")
        )
        .arg(
            Arg::new("frames")
                .long("frames")
                .value_name("FILE")
                .help("最後のミッションの各ティックのスナップショットをJSON Linesで出力")
        )
        .arg(
            Arg::new("log-output")
                .long("log-output")
                .value_name("OUTPUT")
                .default_value("console")
                .help("ログ出力先 (console, file, both)")
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .default_value("info")
                .help("ログレベル (trace, debug, info, warn, error)")
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(clap::ArgAction::Count)
                .help("詳細出力レベル (-v: 基本, -vv: 詳細, -vvv: ティックごと)")
        )
        .get_matches();

    println!("救助シミュレーション (Rescue Simulation) - rescuesim v0.1.0");
    println!();

    let _log_guard = match setup_logging(&matches) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("エラー: {}", e);
            std::process::exit(1);
        }
    };

    let options = RunOptions::from_matches(&matches);
    if options.verbose_level > 0 {
        println!("詳細出力レベル: {}", options.verbose_level);
    }

    if let Some(scenario_path) = matches.get_one::<String>("scenario") {
        match run_scenario(scenario_path, matches.get_flag("info"), &options) {
            Ok(_) => {
                if options.verbose_level > 0 {
                    println!("シナリオ実行が正常に完了しました。");
                }
            }
            Err(e) => {
                eprintln!("エラー: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        show_default_help();
    }
}

fn setup_logging(
    matches: &ArgMatches,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>, Box<dyn std::error::Error>> {
    let mut config = LogConfig::default();
    if let Some(output) = matches.get_one::<String>("log-output") {
        config.output = LogOutput::from_str(output)?;
    }
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.level = parse_log_level(level);
    }
    if config.output.writes_file() {
        ensure_log_directory(&config.log_dir)?;
    }
    init_logging(config)
}

/// シナリオファイルを読み込んで実行
fn run_scenario(scenario_path: &str, info_only: bool, options: &RunOptions) -> Result<(), Box<dyn std::error::Error>> {
    let mut scenario = ScenarioConfig::from_file(scenario_path)?;
    if let Some(count) = options.agents {
        scenario.agents.count = count;
    }

    if options.verbose_level > 0 {
        println!("シナリオファイル読み込み完了: {}", scenario_path);
    }

    if info_only {
        scenario.print_summary();
        return Ok(());
    }

    let mut store: Box<dyn IMissionStore> = match &options.history {
        Some(path) => Box::new(JsonlMissionStore::new(path)),
        None => Box::new(MemoryMissionStore::new()),
    };

    if options.stats_only {
        let missions = store.load(Some(&scenario.meta.name))?;
        MissionStatistics::from_missions(&missions).print_summary();
        return Ok(());
    }

    scenario.print_summary();
    println!();

    match options.batch {
        Some(count) => execute_batch(scenario, count, store.as_mut(), options.verbose_level),
        None => execute_iterations(&scenario, store.as_mut(), options),
    }
}

/// 学習を挟みながらミッションを繰り返し実行
fn execute_iterations(
    scenario: &ScenarioConfig,
    store: &mut dyn IMissionStore,
    options: &RunOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let limit = if options.until_success {
        options.max_iterations
    } else {
        options.iterations
    };

    for iteration in 0..limit {
        println!("=== ミッション {}/{} ===", iteration + 1, limit);

        let history = store.load(Some(&scenario.meta.name))?;
        let hints = LearningHints::from_history(&history);
        if !history.is_empty() {
            println!(
                "過去{}件の記録から学習: 許容度バイアス {:+.3}, 回避位置 {}箇所",
                history.len(),
                hints.risk_tolerance_bias,
                hints.avoid_positions.len()
            );
        }

        let seed = derive_seed(scenario.sim.seed, iteration as u64);
        let mission_id = format!("mission_{}_{:03}", Utc::now().format("%Y%m%d%H%M%S"), iteration + 1);
        let controller = MissionController::from_scenario(
            scenario,
            (!hints.is_empty()).then_some(&hints),
            mission_id,
            seed,
            options.verbose_level,
        )?;

        let last = iteration + 1 == limit;
        let mission = match &options.frames {
            Some(path) => {
                let mut recorder = FrameRecorder::new();
                let mission = controller.run_with_observer(scenario.sim.t_max_s, scenario.sim.dt_s, &mut recorder);
                if last || mission.success {
                    recorder.write_jsonl(path)?;
                }
                mission
            }
            None => controller.run(scenario.sim.t_max_s, scenario.sim.dt_s),
        };

        store.record(&mission)?;
        print_mission_result(&mission);

        let stats = MissionStatistics::from_missions(&store.load(Some(&scenario.meta.name))?);
        println!("累計成功率: {:.1}% ({}/{})", stats.success_rate, stats.successful, stats.total);
        println!();

        if options.until_success && mission.success {
            println!("{}回目のミッションで救助に成功しました", iteration + 1);
            return Ok(());
        }
    }

    if options.until_success {
        println!("{}回の試行で救助に成功しませんでした", limit);
    }
    Ok(())
}

/// 異なるシードのミッションを並列実行
///
/// 各ミッションは独立しており（学習ヒントなし）、結果はシード順に記録されます。
fn execute_batch(
    scenario: ScenarioConfig,
    count: u32,
    store: &mut dyn IMissionStore,
    verbose_level: u8,
) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_multi_thread().build()?;
    let scenario = Arc::new(scenario);
    let base_seed = scenario.sim.seed;

    let missions: Vec<Mission> = runtime.block_on(async {
        let handles: Vec<_> = (0..count)
            .map(|i| {
                let scenario = Arc::clone(&scenario);
                let seed = derive_seed(base_seed, i as u64);
                tokio::task::spawn_blocking(move || {
                    let mission_id = format!("batch_{:03}_seed_{}", i + 1, seed);
                    MissionController::from_scenario(&scenario, None, mission_id, seed, verbose_level)
                        .map(|controller| controller.run(scenario.sim.t_max_s, scenario.sim.dt_s))
                })
            })
            .collect();

        let mut missions = Vec::with_capacity(handles.len());
        for handle in handles {
            missions.push(handle.await??);
        }
        Ok::<_, Box<dyn std::error::Error>>(missions)
    })?;

    for mission in &missions {
        store.record(mission)?;
        print_mission_result(mission);
    }

    println!();
    MissionStatistics::from_missions(&missions).print_summary();
    Ok(())
}

/// ミッション結果を表示
fn print_mission_result(mission: &Mission) {
    match mission.reason_failed {
        None => println!("結果: 成功 ({:.1}秒) [{}]", mission.total_time, mission.mission_id),
        Some(reason) => println!("結果: 失敗 - {} ({:.1}秒) [{}]", reason, mission.total_time, mission.mission_id),
    }

    for agent in &mission.agents {
        let status = if agent.rescued {
            "到達".to_string()
        } else if let Some(cause) = agent.death_cause {
            format!("行動不能 ({:?})", cause)
        } else {
            "行動中".to_string()
        };
        println!(
            "  {}: {} 位置 {} 体力 {:.2} 累積危険度 {:.2} ステップ {} 判断 {}件",
            agent.agent_id,
            status,
            agent.position,
            agent.health,
            agent.cumulative_danger,
            agent.trajectory.len().saturating_sub(1),
            agent.decisions.len()
        );
    }
}

/// デフォルトヘルプとシナリオ一覧を表示
fn show_default_help() {
    println!("使用方法:");
    println!("  rescuesim [オプション]");
    println!();
    println!("オプション:");
    println!("  -s, --scenario <FILE>     シナリオファイルを指定して実行");
    println!("  -i, --info                シナリオ情報のみ表示");
    println!("  -n, --iterations <N>      学習を挟みながらN回実行");
    println!("      --until-success       救助成功まで繰り返す (--max-iterations で上限)");
    println!("  -a, --agents <N>          エージェント数を上書き");
    println!("      --history <FILE>      ミッション記録ファイル(.jsonl)");
    println!("      --stats-only          記録の統計のみ表示");
    println!("      --batch <N>           異なるシードでN件を並列実行");
    println!("      --frames <FILE>       ティックごとのスナップショットを出力");
    println!("  -v, --verbose             詳細出力 (複数指定で詳細レベル上昇)");
    println!("  -h, --help                このヘルプを表示");
    println!();
    println!("利用可能なシナリオファイル:");
    println!("  scenarios/simple_test.yaml     - 1階建ての基本テスト用");
    println!("  scenarios/fire_4story.yaml     - 4階建ての火災シナリオ");
    println!("  scenarios/attacker_4story.yaml - 4階建ての襲撃者シナリオ");
    println!();
    println!("例:");
    println!("  rescuesim -s scenarios/simple_test.yaml");
    println!("  rescuesim -s scenarios/fire_4story.yaml --until-success --history history/fire.jsonl");
    println!("  rescuesim -s scenarios/attacker_4story.yaml --batch 8");
    println!("  rescuesim -s scenarios/fire_4story.yaml -i");
}
