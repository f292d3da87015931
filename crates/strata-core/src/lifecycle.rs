use crate::CoreError;
use strata_runtime::StageKind;
use strata_store::ProvisionState;

/// State a record reaches once `stage` has succeeded.
pub fn state_after(stage: StageKind) -> ProvisionState {
    match stage {
        StageKind::SystemUpdate => ProvisionState::SystemUpdated,
        StageKind::EnvironmentMaterialization => ProvisionState::EnvironmentMaterialized,
        StageKind::SecondaryInstall => ProvisionState::Provisioned,
    }
}

pub fn validate_transition(from: ProvisionState, to: ProvisionState) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (ProvisionState::Pending, ProvisionState::SystemUpdated)
            | (
                ProvisionState::SystemUpdated,
                ProvisionState::EnvironmentMaterialized
            )
            | (
                ProvisionState::EnvironmentMaterialized,
                ProvisionState::Provisioned
            )
            | (
                ProvisionState::Pending
                    | ProvisionState::SystemUpdated
                    | ProvisionState::EnvironmentMaterialized,
                ProvisionState::Failed
            )
            | (
                ProvisionState::Provisioned | ProvisionState::Failed,
                ProvisionState::Pending
            )
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
