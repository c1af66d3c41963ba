#[tokio::main]
async fn main() {
  let mut clog = colog::default_builder();
  clog.filter(None, log::LevelFilter::Info);
  clog.init();

  let targets: Vec<String> = std::env::args().skip(1).collect();
  if let Err(e) = musicli_lib::run(targets).await {
    log::error!("{}", e);
    std::process::exit(1);
  }
}
