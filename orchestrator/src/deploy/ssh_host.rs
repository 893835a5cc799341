//! Deploy the stack onto an existing SSH host

use crate::deploy::{
    install_runtime_step, start_stack_step, upload_stack_step, wait_services_step,
    wait_ssh_step, DeploySession,
};
use crate::pipeline::Pipeline;

pub fn steps() -> Pipeline<DeploySession> {
    Pipeline::new("ssh-host")
        .step(wait_ssh_step())
        .step(install_runtime_step())
        .step(upload_stack_step())
        .step(start_stack_step())
        .step(wait_services_step())
}
