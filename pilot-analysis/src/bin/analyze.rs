// Copyright 2017 ETH Zurich. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Command-line front end: prints rate, utilization and placement
//! reports for one pilot run.

use std::env;
use std::process;

use getopts::{Matches, Options};

use pilot_analysis::{
    analyze_pilot, measure_stage, placement_of_failed, GapConfig, LatencySummary, StageRate,
    TaskFilter, LAUNCHING, SCHEDULING,
};

fn print_usage(program: &str, opts: Options) -> ! {
    let brief = format!("Usage: {} [options] PILOT_SANDBOX", program);
    print!("{}", opts.usage(&brief));
    process::exit(0)
}

fn opt_f64(matches: &Matches, name: &str, default: f64) -> f64 {
    match matches.opt_str(name) {
        Some(value) => match value.parse::<f64>() {
            Ok(secs) if secs > 0.0 => secs,
            _ => {
                eprintln!("invalid value for --{}: {}", name, value);
                process::exit(1)
            }
        },
        None => default,
    }
}

fn fmt_rate(rate: Option<f64>) -> String {
    match rate {
        Some(r) => format!("{:.2}", r),
        None => "n/a".to_owned(),
    }
}

fn fmt_ratio(ratio: Option<f64>) -> String {
    match ratio {
        Some(r) => format!("{:.2}", r),
        None => "n/a".to_owned(),
    }
}

fn print_stage_rate(name: &str, rate: &StageRate) {
    let per_segment: Vec<String> = rate.segments.iter().map(|s| fmt_rate(s.rate())).collect();
    println!(
        "{} rate: {} tasks/s ({} events over {:.2}s active, segments: [{}])",
        name,
        fmt_rate(rate.overall_rate()),
        rate.events,
        rate.active_secs,
        per_segment.join(", ")
    );
}

fn print_placement(label: &str, placement: &Option<LatencySummary>) {
    match placement {
        Some(p) => println!(
            "{} (s) as (mean, std, min, max): ({:.2}, {:.2}, {:.2}, {:.2})",
            label, p.mean, p.stddev, p.min, p.max
        ),
        None => println!("{} (s): n/a", label),
    }
}

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let program = args[0].clone();

    let mut opts = Options::new();
    opts.optflag("f", "failed", "report placement latency of failed tasks only");
    opts.optopt(
        "",
        "sched-prof",
        "scheduler component profile log (reports admission rate)",
        "PATH",
    );
    opts.optopt(
        "",
        "exec-prof",
        "executor component profile log (reports launch rate)",
        "PATH",
    );
    opts.optopt(
        "",
        "local-gap",
        "inactivity gap in seconds that splits rate segments (default: 20)",
        "SECS",
    );
    opts.optopt(
        "",
        "global-gap",
        "inactivity gap in seconds that ends a stage (default: 120)",
        "SECS",
    );
    opts.optflag("h", "help", "print this help menu");

    let matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(f) => {
            eprintln!("{}", f);
            process::exit(1)
        }
    };

    if matches.opt_present("h") {
        print_usage(&program, opts);
    }

    let sandbox = match matches.free.first() {
        Some(dir) => dir.clone(),
        None => print_usage(&program, opts),
    };

    let gaps = GapConfig {
        local: opt_f64(&matches, "local-gap", GapConfig::default().local),
        global: opt_f64(&matches, "global-gap", GapConfig::default().global),
    };

    for (name, stage, log) in [
        ("scheduling", &SCHEDULING, matches.opt_str("sched-prof")),
        ("launching", &LAUNCHING, matches.opt_str("exec-prof")),
    ] {
        if let Some(log) = log {
            match measure_stage(&log, stage, &gaps) {
                Ok(rate) => print_stage_rate(name, &rate),
                Err(err) => {
                    eprintln!("failed to measure {} rate from {}: {}", name, log, err);
                    process::exit(1)
                }
            }
        }
    }

    if matches.opt_present("failed") {
        let (count, placement) = match placement_of_failed(&sandbox) {
            Ok(result) => result,
            Err(err) => {
                eprintln!("failed to analyze {}: {}", sandbox, err);
                process::exit(1)
            }
        };
        println!("num failed tasks: {}", count);
        print_placement("placement", &placement);
        return;
    }

    let summary = match analyze_pilot(&sandbox, TaskFilter::Successful) {
        Ok(summary) => summary,
        Err(err) => {
            eprintln!("failed to analyze {}: {}", sandbox, err);
            process::exit(1)
        }
    };

    for p in &summary.partitions {
        let placement = p
            .placement
            .map(|s| format!("{:.2} {:.2}", s.mean, s.stddev))
            .unwrap_or_else(|| "n/a".to_owned());
        println!(
            "{:03} - {} - cpu util: {}, gpu util: {}, placement (s): {}",
            p.id,
            p.tasks,
            fmt_ratio(p.cpu_utilization),
            fmt_ratio(p.gpu_utilization),
            placement
        );
    }
    println!(
        "num partitions: {} | num tasks: {} (skipped: {}, flagged: {})",
        summary.partition_count, summary.task_count, summary.skipped, summary.flagged
    );
    print_placement("placement", &summary.placement);
}
