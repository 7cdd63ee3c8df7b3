mod runtime;

fn main() -> std::process::ExitCode {
    runtime::run_from_args()
}
