//! Behavioural tests for the connector operations driven through a scripted
//! CloudStack transport.

use std::sync::Arc;

use cumulo::connector::{CloudStackConnector, ConnectorError, ConnectorSettings, DisplayNames};
use cumulo::orchestrator::{
    Account, ComputeCenter, Image, ImageStore, Machine, MachineDescriptor, MachineState,
};
use cumulo::properties::{
    API_KEY, END_POINT, IP_TO_NETWORK_LIST, PropertyBag, SECRET_KEY, SERVICE_OFFERING_ID,
    TEMPLATE_ID, ZONE_ID,
};
use cumulo::reconcile::Reconciliation;
use cumulo::registry::ClientRegistry;
use cumulo::test_support::{
    RecordedRegistration, RecordingControllerServices, ScriptedTransport, StaticIdentityEncoder,
    deploy_response, error_response, job_response, list_response, query_value,
};
use rstest::{fixture, rstest};

type Connector =
    CloudStackConnector<RecordingControllerServices, StaticIdentityEncoder, ScriptedTransport>;

const AGENT_PORT: u16 = 9090;

fn connection_properties() -> PropertyBag {
    PropertyBag::new()
        .with(API_KEY, "key")
        .with(SECRET_KEY, "secret")
        .with(END_POINT, "http://cloud.example/client")
}

#[fixture]
fn compute_center() -> ComputeCenter {
    ComputeCenter {
        type_name: String::from("CloudStack"),
        account: Account {
            name: String::from("acme"),
            access_key: String::from("access"),
        },
        properties: connection_properties(),
    }
}

fn descriptor() -> MachineDescriptor {
    MachineDescriptor {
        properties: PropertyBag::new()
            .with(SERVICE_OFFERING_ID, "small")
            .with(ZONE_ID, "zone-1")
            .with(IP_TO_NETWORK_LIST, "10.0.0.9,net-b"),
    }
}

fn image() -> Image {
    Image {
        properties: PropertyBag::new().with(TEMPLATE_ID, "tmpl-9"),
    }
}

fn settings() -> ConnectorSettings {
    ConnectorSettings {
        controller_host: String::from("controller.example"),
        controller_port: 8090,
        display_name_prefix: String::from("AD_"),
    }
}

fn connector(transport: &ScriptedTransport, services: RecordingControllerServices) -> Connector {
    CloudStackConnector::new(
        Arc::new(ClientRegistry::new(transport.clone())),
        Arc::new(DisplayNames::new()),
        services,
        StaticIdentityEncoder::new(),
        settings(),
    )
}

fn machine(state: MachineState, compute_center: ComputeCenter) -> Machine {
    Machine {
        id: String::from("machine-1"),
        name: String::from("vm-42"),
        ip_address: String::from("0.0.0.0"),
        state,
        compute_center,
    }
}

#[rstest]
#[tokio::test]
async fn create_machine_deploys_and_registers(compute_center: ComputeCenter) {
    let transport = ScriptedTransport::new();
    transport.push_body(list_response(&[]));
    transport.push_body(deploy_response("vm-42", "job-1"));
    let services = RecordingControllerServices::new(AGENT_PORT);
    let connector = connector(&transport, services.clone());

    let machine = connector
        .create_machine(&compute_center, &image(), &descriptor())
        .await
        .expect("create succeeds");

    assert_eq!(machine.name, "vm-42");
    assert_eq!(machine.state, MachineState::Starting);
    assert_eq!(
        services.registrations(),
        [RecordedRegistration {
            server_id: String::from("vm-42"),
            host_identifier: String::from("host-acme"),
            agent_port: AGENT_PORT,
        }]
    );
    assert_eq!(
        transport.commands(),
        ["listVirtualMachines", "deployVirtualMachine"]
    );
    let requests = transport.requests();
    let deploy = requests.get(1).expect("deploy request");
    assert_eq!(
        query_value(deploy, "userdata").as_deref(),
        Some("controller.example%3A8090%3Aacme")
    );
    assert_eq!(
        query_value(deploy, "iptonetworklist%5B0%5D.networkid").as_deref(),
        Some("net-b")
    );
    let display_name = query_value(deploy, "displayname").expect("display name");
    assert!(display_name.starts_with("AD_"), "display name: {display_name}");
}

#[rstest]
#[tokio::test]
async fn connectors_sharing_a_process_never_reuse_display_names(compute_center: ComputeCenter) {
    let transport = ScriptedTransport::new();
    transport.push_body(list_response(&[]));
    transport.push_body(deploy_response("vm-1", "job-1"));
    transport.push_body(deploy_response("vm-2", "job-2"));
    let registry = Arc::new(ClientRegistry::new(transport.clone()));
    let names = Arc::new(DisplayNames::new());
    let first: Connector = CloudStackConnector::new(
        Arc::clone(&registry),
        Arc::clone(&names),
        RecordingControllerServices::new(AGENT_PORT),
        StaticIdentityEncoder::new(),
        settings(),
    );
    let second: Connector = CloudStackConnector::new(
        registry,
        names,
        RecordingControllerServices::new(AGENT_PORT),
        StaticIdentityEncoder::new(),
        settings(),
    );

    first
        .create_machine(&compute_center, &image(), &descriptor())
        .await
        .expect("first create");
    second
        .create_machine(&compute_center, &image(), &descriptor())
        .await
        .expect("second create");

    let names: Vec<String> = transport
        .requests()
        .iter()
        .filter_map(|url| query_value(url, "displayname"))
        .collect();
    let [first_name, second_name] = names.as_slice() else {
        panic!("expected two deploys, got {names:?}");
    };
    assert_ne!(first_name, second_name);
}

#[rstest]
#[tokio::test]
async fn failed_registration_terminates_the_instance(compute_center: ComputeCenter) {
    let transport = ScriptedTransport::new();
    transport.push_body(list_response(&[]));
    transport.push_body(deploy_response("vm-42", "job-1"));
    transport.push_body(job_response("destroyvirtualmachineresponse", "job-2"));
    let connector = connector(
        &transport,
        RecordingControllerServices::failing(AGENT_PORT, "controller rejected machine"),
    );

    let err = connector
        .create_machine(&compute_center, &image(), &descriptor())
        .await
        .expect_err("registration fails");

    assert!(matches!(err, ConnectorError::Orchestrator { .. }), "{err}");
    assert!(err.to_string().contains("controller rejected machine"));
    assert_eq!(
        transport.commands(),
        [
            "listVirtualMachines",
            "deployVirtualMachine",
            "destroyVirtualMachine"
        ]
    );
}

#[rstest]
#[tokio::test]
async fn failed_rollback_reports_orphaned_instance(compute_center: ComputeCenter) {
    let transport = ScriptedTransport::new();
    transport.push_body(list_response(&[]));
    transport.push_body(deploy_response("vm-42", "job-1"));
    transport.push_body(error_response(530, "Failed to destroy vm"));
    transport.push_body(list_response(&[("vm-42", "Running", &[])]));
    let connector = connector(
        &transport,
        RecordingControllerServices::failing(AGENT_PORT, "controller rejected machine"),
    );

    let err = connector
        .create_machine(&compute_center, &image(), &descriptor())
        .await
        .expect_err("rollback fails");

    let ConnectorError::OrphanedInstance {
        ref kind,
        ref instance_id,
        ..
    } = err
    else {
        panic!("expected orphaned instance error, got {err}");
    };
    assert_eq!(kind, "CloudStack");
    assert_eq!(instance_id, "vm-42");
    let message = err.to_string();
    assert!(message.contains("vm-42"), "message: {message}");
    assert!(message.contains("controller rejected machine"), "message: {message}");
    assert!(message.contains("shut down manually"), "message: {message}");
    assert!(message.contains("Failed to destroy vm"), "message: {message}");
    assert_eq!(transport.remaining(), 0);
}

#[rstest]
#[tokio::test]
async fn failed_deploy_does_not_register_or_terminate(compute_center: ComputeCenter) {
    let transport = ScriptedTransport::new();
    transport.push_body(list_response(&[]));
    transport.push_body(error_response(431, "Unable to find template"));
    let services = RecordingControllerServices::new(AGENT_PORT);
    let connector = connector(&transport, services.clone());

    let err = connector
        .create_machine(&compute_center, &image(), &descriptor())
        .await
        .expect_err("deploy fails");

    assert!(err.to_string().contains("Unable to find template"));
    assert!(services.registrations().is_empty());
    assert_eq!(
        transport.commands(),
        ["listVirtualMachines", "deployVirtualMachine"]
    );
}

#[rstest]
#[tokio::test]
async fn identity_failure_stops_before_deploy(compute_center: ComputeCenter) {
    let transport = ScriptedTransport::new();
    transport.push_body(list_response(&[]));
    let connector = CloudStackConnector::new(
        Arc::new(ClientRegistry::new(transport.clone())),
        Arc::new(DisplayNames::new()),
        RecordingControllerServices::new(AGENT_PORT),
        StaticIdentityEncoder::failing("access key revoked"),
        settings(),
    );

    let err = connector
        .create_machine(&compute_center, &image(), &descriptor())
        .await
        .expect_err("encoding fails");

    assert!(err.to_string().contains("access key revoked"), "{err}");
    assert_eq!(transport.commands(), ["listVirtualMachines"]);
}

#[rstest]
#[tokio::test]
async fn refresh_moves_running_machine_to_started(compute_center: ComputeCenter) {
    let transport = ScriptedTransport::new();
    transport.push_body(list_response(&[]));
    transport.push_body(list_response(&[("vm-42", "Running", &["10.0.0.5"])]));
    transport.push_body(list_response(&[("vm-42", "Running", &["10.0.0.5"])]));
    let connector = connector(&transport, RecordingControllerServices::new(AGENT_PORT));
    let mut machine = machine(MachineState::Starting, compute_center);

    let outcome = connector
        .refresh_machine_state(&mut machine)
        .await
        .expect("refresh");

    assert_eq!(outcome, Reconciliation::Transitioned(MachineState::Started));
    assert_eq!(machine.state, MachineState::Started);
    assert_eq!(machine.ip_address, "10.0.0.5");
}

#[rstest]
#[tokio::test]
async fn refresh_treats_unreachable_stopping_machine_as_stopped(compute_center: ComputeCenter) {
    let transport = ScriptedTransport::new();
    transport.push_body(list_response(&[]));
    transport.push_transport_error("operation timed out");
    let connector = connector(&transport, RecordingControllerServices::new(AGENT_PORT));
    let mut machine = machine(MachineState::Stopping, compute_center);

    connector
        .refresh_machine_state(&mut machine)
        .await
        .expect("failure is swallowed");

    assert_eq!(machine.state, MachineState::Stopped);
}

#[rstest]
#[case::stopping("Stopping")]
#[case::migrating("Migrating")]
#[tokio::test]
async fn refresh_settles_stopping_machine_on_unrecognised_state(
    compute_center: ComputeCenter,
    #[case] remote_state: &str,
) {
    let transport = ScriptedTransport::new();
    transport.push_body(list_response(&[]));
    transport.push_body(list_response(&[("vm-42", remote_state, &[])]));
    let connector = connector(&transport, RecordingControllerServices::new(AGENT_PORT));
    let mut machine = machine(MachineState::Stopping, compute_center);

    let outcome = connector
        .refresh_machine_state(&mut machine)
        .await
        .expect("refresh");

    assert_eq!(outcome, Reconciliation::Transitioned(MachineState::Stopped));
    assert_eq!(machine.state, MachineState::Stopped);
}

#[rstest]
#[tokio::test]
async fn refresh_surfaces_starting_failures_with_machine_id(compute_center: ComputeCenter) {
    let transport = ScriptedTransport::new();
    transport.push_body(list_response(&[]));
    transport.push_transport_error("connection refused");
    let connector = connector(&transport, RecordingControllerServices::new(AGENT_PORT));
    let mut machine = machine(MachineState::Starting, compute_center);

    let err = connector
        .refresh_machine_state(&mut machine)
        .await
        .expect_err("surfaced");

    let message = err.to_string();
    assert!(message.contains("machine-1"), "message: {message}");
    assert!(message.contains("connection refused"), "message: {message}");
    assert_eq!(machine.state, MachineState::Starting);
}

#[rstest]
#[tokio::test]
async fn refresh_ignores_settled_machines(compute_center: ComputeCenter) {
    let transport = ScriptedTransport::new();
    let connector = connector(&transport, RecordingControllerServices::new(AGENT_PORT));
    let mut machine = machine(MachineState::Started, compute_center);

    let outcome = connector
        .refresh_machine_state(&mut machine)
        .await
        .expect("no-op");

    assert_eq!(outcome, Reconciliation::Unchanged);
    assert!(transport.requests().is_empty());
}

#[rstest]
#[tokio::test]
async fn terminate_failure_names_the_machine(compute_center: ComputeCenter) {
    let transport = ScriptedTransport::new();
    transport.push_body(list_response(&[]));
    transport.push_body(error_response(530, "Failed to destroy vm"));
    transport.push_body(list_response(&[("vm-42", "Running", &[])]));
    let connector = connector(&transport, RecordingControllerServices::new(AGENT_PORT));
    let machine = machine(MachineState::Started, compute_center);

    let err = connector
        .terminate_machine(&machine)
        .await
        .expect_err("terminate fails");

    let message = err.to_string();
    assert!(
        message.contains("error terminating CloudStack instance machine-1"),
        "message: {message}"
    );
    assert!(message.contains("Failed to destroy vm"), "message: {message}");
}

#[rstest]
#[tokio::test]
async fn terminate_of_vanished_instance_succeeds(compute_center: ComputeCenter) {
    let transport = ScriptedTransport::new();
    transport.push_body(list_response(&[]));
    transport.push_body(error_response(431, "Unable to find virtual machine"));
    transport.push_body(list_response(&[]));
    let connector = connector(&transport, RecordingControllerServices::new(AGENT_PORT));
    let machine = machine(MachineState::Stopping, compute_center);

    connector
        .terminate_machine(&machine)
        .await
        .expect("already gone");
}

#[rstest]
#[tokio::test]
async fn restart_issues_reboot(compute_center: ComputeCenter) {
    let transport = ScriptedTransport::new();
    transport.push_body(list_response(&[]));
    transport.push_body(job_response("rebootvirtualmachineresponse", "job-3"));
    let connector = connector(&transport, RecordingControllerServices::new(AGENT_PORT));
    let machine = machine(MachineState::Started, compute_center);

    assert!(connector.restart_machine(&machine).await.expect("restart"));
    assert_eq!(
        transport.commands(),
        ["listVirtualMachines", "rebootVirtualMachine"]
    );
}

#[rstest]
#[tokio::test]
async fn validate_compute_center_accepts_working_credentials(compute_center: ComputeCenter) {
    let transport = ScriptedTransport::new();
    transport.push_body(list_response(&[]));
    let connector = connector(&transport, RecordingControllerServices::new(AGENT_PORT));

    connector
        .validate_compute_center(&compute_center)
        .await
        .expect("valid");
}

#[rstest]
#[tokio::test]
async fn validate_compute_center_rejects_bad_credentials(compute_center: ComputeCenter) {
    let transport = ScriptedTransport::new();
    transport.push_body(error_response(401, "unable to verify user credentials"));
    let connector = connector(&transport, RecordingControllerServices::new(AGENT_PORT));

    let err = connector
        .validate_compute_center(&compute_center)
        .await
        .expect_err("invalid");

    assert!(matches!(err, ConnectorError::InvalidObject { .. }));
    assert!(
        err.to_string()
            .contains("failed to validate the CloudStack connector properties"),
        "message: {err}"
    );
}

#[rstest]
#[tokio::test]
async fn validate_image_store_requires_secret_key() {
    let transport = ScriptedTransport::new();
    let connector = connector(&transport, RecordingControllerServices::new(AGENT_PORT));
    let store = ImageStore {
        type_name: String::from("CloudStack"),
        properties: PropertyBag::new()
            .with(API_KEY, "key")
            .with(END_POINT, "http://cloud.example/client"),
    };

    let err = connector
        .validate_image_store(&store)
        .await
        .expect_err("secret missing");

    let message = err.to_string();
    assert!(message.contains("CloudStack store"), "message: {message}");
    assert!(message.contains("Secret Key"), "message: {message}");
    assert!(transport.requests().is_empty());
}

#[rstest]
fn agent_port_comes_from_controller_services() {
    let transport = ScriptedTransport::new();
    let connector = connector(&transport, RecordingControllerServices::new(AGENT_PORT));

    assert_eq!(connector.agent_port(), AGENT_PORT);
}
