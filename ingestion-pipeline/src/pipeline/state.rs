use state_machines::state_machine;

state_machine! {
    name: UploadMachine,
    state: UploadState,
    initial: Ready,
    states: [Ready, JobCreated, FilesProcessed, Aggregated, Completed],
    events {
        create_job { transition: { from: Ready, to: JobCreated } }
        process_files { transition: { from: JobCreated, to: FilesProcessed } }
        aggregate { transition: { from: FilesProcessed, to: Aggregated } }
        complete { transition: { from: Aggregated, to: Completed } }
    }
}

pub fn ready() -> UploadMachine<(), Ready> {
    UploadMachine::new(())
}
