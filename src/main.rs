use live_task_render::app::cli;

fn main() {
    std::process::exit(cli::run_cli());
}
