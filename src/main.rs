use anyhow::Result;
use gradelab_eval::utils::logging;
use gradelab_eval::{App, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置
    let config = Config::from_env();

    // 初始化日志（写入日志文件头）
    logging::init(config.verbose_logging, Some(&config.output_log_file))?;

    // 初始化并运行应用
    let stats = App::initialize(config)?.run().await?;

    if stats.failed > 0 {
        std::process::exit(1);
    }

    Ok(())
}
