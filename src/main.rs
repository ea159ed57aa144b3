use anyhow::Result;
use log::info;
use std::sync::Arc;

use novelgen::core::config::Config;
use novelgen::core::io::NativeStorage;
use novelgen::services::llm::create_llm;
use novelgen::services::session::Session;
use novelgen::services::workflow::WorkflowManager;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {:#}", e);
            return Err(e);
        }
    };

    // Without credentials every stage would fail, so refuse to start.
    if let Err(e) = config.validate() {
        eprintln!("{}", e);
        return Err(e);
    }

    config.ensure_directories()?;

    let llm = create_llm(&config.llm)?;
    let model = config.llm.model_name();
    info!("Using provider '{}' with model '{}'", config.llm.provider, model);

    let mut manager = WorkflowManager::new(llm, model, Arc::new(NativeStorage::new()));
    manager.set_chapter_count(config.default_chapters);

    let mut session = Session::new(manager, config.export_path().to_string_lossy());
    session.run().await
}
