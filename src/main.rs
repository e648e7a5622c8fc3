use anyhow::{bail, Context, Result};
use edfconv::transcode::{depth, legacy, structured, trigger};
use edfconv::{CancelToken, Config, ConversionReport};
use env_logger::Env;

const USAGE: &str = "usage: edfconv <depth|legacy|trigger|structured> <input> <output> [config.toml]
       edfconv --generate-config [path]";

fn main() -> Result<()> {
    // 初始化日志
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let args: Vec<String> = std::env::args().collect();

    // 生成配置文件
    if args.len() > 1 && args[1] == "--generate-config" {
        let config_path = if args.len() > 2 { &args[2] } else { "edfconv.toml" };
        Config::write_default(config_path)
            .with_context(|| format!("failed to write {}", config_path))?;
        println!("wrote default configuration to {}", config_path);
        return Ok(());
    }

    if args.len() < 4 {
        bail!("{}", USAGE);
    }
    let (command, input, output) = (&args[1], &args[2], &args[3]);
    let config_path = if args.len() > 4 { &args[4] } else { "edfconv.toml" };
    let config = Config::load_or_default(config_path)
        .with_context(|| format!("failed to load {}", config_path))?;

    // Ctrl+C 取消转换, 输出文件会被删除
    let cancel = CancelToken::new();
    let handle = cancel.clone();
    ctrlc::set_handler(move || {
        log::info!("interrupt received, cancelling...");
        handle.cancel();
    })?;

    let result = match command.as_str() {
        "depth" => depth::convert(input, output, &config.depth.to_options(), &cancel),
        "legacy" => legacy::convert(input, output, &config.legacy.to_options(), &cancel),
        "trigger" => trigger::convert(input, output, &config.trigger.to_options(), &cancel),
        "structured" => structured::convert(input, output, &config.structured.to_options(), &cancel),
        other => bail!("unknown conversion \"{}\"\n{}", other, USAGE),
    };

    match result {
        Ok(report) => {
            print_report(output, &report);
            Ok(())
        }
        Err(e) if e.is_cancelled() => {
            log::warn!("conversion cancelled, {} was not written", output);
            std::process::exit(130);
        }
        Err(e) => {
            let category = e.category();
            Err(e).with_context(|| format!("{} conversion of {} failed ({:?})", command, input, category))
        }
    }
}

fn print_report(output: &str, report: &ConversionReport) {
    println!("{}", output);
    println!("  records read:     {}", report.records_read);
    println!("  records written:  {}", report.records_written);
    println!("  annotations:      {}", report.annotations_written);
    if report.annotations_dropped > 0 {
        println!("  dropped:          {}", report.annotations_dropped);
    }
    if report.divisor > 1 {
        println!("  record divisor:   {}", report.divisor);
    }
}
