use std::collections::HashMap;

use broker_db::model::{InstanceType, OperationAction};
use lazy_static::lazy_static;

const CERT_ISSUANCE: &[&str] = &[
    "acme_register_account",
    "create_csr_and_order",
    "answer_dns01_challenges",
    "retrieve_certificate",
    "upload_certificate",
];

lazy_static! {
    /// Static (plan, action) → ordered step-name list catalog. Steps that are no-ops for a given run (e.g. reissuance when
    /// the new and current certificate ids already match) detect that for
    /// themselves; the pipeline shape itself never skips steps based on
    /// runtime state.
    pub static ref PIPELINES: HashMap<(InstanceType, OperationAction), &'static [&'static str]> = {
        let mut m: HashMap<(InstanceType, OperationAction), &'static [&'static str]> = HashMap::new();

        m.insert((InstanceType::Alb, OperationAction::Provision), &[
            "acme_register_account",
            "create_csr_and_order",
            "answer_dns01_challenges",
            "retrieve_certificate",
            "upload_certificate",
            "apply_alb_listener",
            "swap_certificate",
        ]);
        m.insert((InstanceType::Alb, OperationAction::Update), &[
            "acme_register_account",
            "create_csr_and_order",
            "answer_dns01_challenges",
            "retrieve_certificate",
            "upload_certificate",
            "apply_alb_listener",
            "swap_certificate",
            "delete_old_certificate",
        ]);
        m.insert((InstanceType::Alb, OperationAction::Renew), &[
            "create_csr_and_order",
            "answer_dns01_challenges",
            "retrieve_certificate",
            "upload_certificate",
            "apply_alb_listener",
            "swap_certificate",
            "delete_old_certificate",
        ]);
        m.insert((InstanceType::Alb, OperationAction::Deprovision), &[
            "remove_alb_certificate",
            "delete_all_certificates",
            "deactivate_instance",
        ]);

        m.insert((InstanceType::Cdn, OperationAction::Provision), &[
            "acme_register_account",
            "create_csr_and_order",
            "answer_dns01_challenges",
            "retrieve_certificate",
            "upload_certificate",
            "apply_cdn_distribution",
            "swap_certificate",
        ]);
        m.insert((InstanceType::Cdn, OperationAction::Update), &[
            "acme_register_account",
            "create_csr_and_order",
            "answer_dns01_challenges",
            "retrieve_certificate",
            "upload_certificate",
            "apply_cdn_distribution",
            "swap_certificate",
            "delete_old_certificate",
        ]);
        m.insert((InstanceType::Cdn, OperationAction::Renew), &[
            "create_csr_and_order",
            "answer_dns01_challenges",
            "retrieve_certificate",
            "upload_certificate",
            "apply_cdn_distribution",
            "swap_certificate",
            "delete_old_certificate",
        ]);
        m.insert((InstanceType::Cdn, OperationAction::Deprovision), &[
            "delete_cdn_distribution",
            "delete_all_certificates",
            "deactivate_instance",
        ]);

        m.insert((InstanceType::CdnDedicatedWaf, OperationAction::Provision), &[
            "acme_register_account",
            "create_csr_and_order",
            "answer_dns01_challenges",
            "retrieve_certificate",
            "upload_certificate",
            "apply_cdn_distribution",
            "create_waf_acl",
            "put_waf_logging_configuration",
            "create_route53_health_checks",
            "associate_shield_protection",
            "swap_certificate",
        ]);
        m.insert((InstanceType::CdnDedicatedWaf, OperationAction::Update), &[
            "acme_register_account",
            "create_csr_and_order",
            "answer_dns01_challenges",
            "retrieve_certificate",
            "upload_certificate",
            "apply_cdn_distribution",
            "create_waf_acl",
            "put_waf_logging_configuration",
            "create_route53_health_checks",
            "associate_shield_protection",
            "swap_certificate",
            "delete_old_certificate",
        ]);
        m.insert((InstanceType::CdnDedicatedWaf, OperationAction::Renew), &[
            "create_csr_and_order",
            "answer_dns01_challenges",
            "retrieve_certificate",
            "upload_certificate",
            "apply_cdn_distribution",
            "swap_certificate",
            "delete_old_certificate",
        ]);
        m.insert((InstanceType::CdnDedicatedWaf, OperationAction::Deprovision), &[
            "disassociate_shield_protection",
            "delete_route53_health_checks",
            "delete_waf_acl",
            "delete_cdn_distribution",
            "delete_all_certificates",
            "deactivate_instance",
        ]);

        m.insert((InstanceType::Migration, OperationAction::Provision), &[] as &[&str]);
        m.insert((InstanceType::Migration, OperationAction::Update), &[] as &[&str]);
        m.insert((InstanceType::Migration, OperationAction::Renew), &[] as &[&str]);
        m.insert((InstanceType::Migration, OperationAction::Deprovision), &["deactivate_instance"]);

        m
    };
}

/// The step names for a (plan, action) pair. Empty for a combination the
/// catalog has nothing to do for (`migration` provisioning is a pass-through
/// today); callers that enqueue a pipeline should treat an empty list as an
/// immediate success rather than an error.
pub fn steps_for(instance_type: InstanceType, action: OperationAction) -> &'static [&'static str] {
    PIPELINES.get(&(instance_type, action)).copied().unwrap_or(&[])
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cdn_update_always_reconfigures_the_distribution() {
        let steps = steps_for(InstanceType::Cdn, OperationAction::Update);
        assert!(steps.contains(&"apply_cdn_distribution"));
    }

    #[test]
    fn alb_provision_ends_with_a_certificate_swap() {
        let steps = steps_for(InstanceType::Alb, OperationAction::Provision);
        assert_eq!(steps.last(), Some(&"swap_certificate"));
    }

    #[test]
    fn every_step_name_is_registered_in_the_task_table() {
        for steps in PIPELINES.values() {
            for name in *steps {
                assert!(crate::tasks::lookup(name).is_some(), "unregistered step {name}");
            }
        }
    }
}
