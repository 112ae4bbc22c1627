//! Device command handlers.

use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tabled::Tabled;

use lookout_core::{ClaimOutcome, Device, DeviceHealth, RegistrationState, Session, Subscription};

use crate::cli::{DevicesArgs, DevicesCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

use super::util;

// ── Table rows ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Owner")]
    owner: String,
    #[tabled(rename = "Last Activity")]
    last_activity: String,
}

fn device_row(device: &Device, me: &str, color: bool) -> DeviceRow {
    let owner = match device.owner_id.as_deref() {
        Some(id) if id == me => "you".to_owned(),
        Some(id) => id.to_owned(),
        None => "-".to_owned(),
    };
    let last_activity = match device.last_activity_type.as_deref() {
        Some(kind) => format!("{kind} ({})", util::fmt_time(device.last_activity_at)),
        None => "-".into(),
    };
    DeviceRow {
        id: device.id.clone(),
        name: device.name.clone(),
        status: output::status_label(device.status, color),
        owner,
        last_activity,
    }
}

fn detail(device: &Device) -> String {
    let owner = match (&device.owner_id, device.owner_type) {
        (Some(id), Some(kind)) => format!("{id} ({kind})"),
        (Some(id), None) => id.clone(),
        _ => "unclaimed".into(),
    };
    [
        format!("ID:              {}", device.id),
        format!("Name:            {}", device.name),
        format!("Status:          {}", device.status),
        format!("Owner:           {owner}"),
        format!(
            "Last activity:   {} at {}",
            device.last_activity_type.as_deref().unwrap_or("-"),
            util::fmt_time(device.last_activity_at)
        ),
        format!("Created:         {}", util::fmt_time(device.created_at)),
        format!("Fingerprints:    {}", device.registered_users.len()),
    ]
    .join("\n")
}

fn health_detail(health: &DeviceHealth) -> String {
    let uptime = Duration::from_secs_f64(health.uptime.max(0.0));
    [
        format!(
            "Uptime:          {}",
            humantime::format_duration(Duration::from_secs(uptime.as_secs()))
        ),
        format!("Latency:         {:.0} ms", health.latency),
        format!("Signal quality:  {:.0}%", health.signal_quality),
    ]
    .join("\n")
}

// ── Helpers ──────────────────────────────────────────────────────────

/// Snapshot of every device the user can see: owned, then shared.
async fn visible_devices(session: &Session) -> Result<Arc<Vec<Device>>, CliError> {
    let ids = session.visible_device_ids().await?.latest();
    let devices = session.devices().subscribe_devices_by_ids(&ids).await?;
    Ok(devices.latest())
}

async fn require_device(session: &Session, device_id: &str) -> Result<Device, CliError> {
    session
        .devices()
        .fetch_device(device_id)
        .await?
        .ok_or_else(|| CliError::NotFound {
            resource_type: "Device".into(),
            identifier: device_id.into(),
            list_command: "devices list".into(),
        })
}

fn print_devices(devices: &[Device], session: &Session, global: &GlobalOpts) -> Result<(), CliError> {
    let color = output::should_color(&global.color);
    let me = session.user_id();
    let out = output::render_list(
        &global.output,
        devices,
        |d| device_row(d, me, color),
        |d| d.id.clone(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}

fn describe(state: &RegistrationState) -> &'static str {
    match state {
        RegistrationState::Idle => "Starting",
        RegistrationState::Publishing => "Contacting device",
        RegistrationState::Polling => "Place your finger on the sensor",
        RegistrationState::AlreadyRegistered => "Already enrolled",
        RegistrationState::Registered => "Fingerprint enrolled",
        RegistrationState::Cancelled => "Enrollment cancelled",
        RegistrationState::TimedOut => "Device did not confirm in time",
        RegistrationState::Failed(_) => "Enrollment failed",
    }
}

async fn enroll(
    session: &Session,
    device_id: &str,
    replace: bool,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let flow = session.registration(device_id);

    let spinner = if global.quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new_spinner()
    };
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(120));

    let mut states = flow.watch();
    let progress = spinner.clone();
    let updates = tokio::spawn(async move {
        loop {
            let state = states.borrow_and_update().clone();
            progress.set_message(describe(&state));
            if state.is_terminal() || states.changed().await.is_err() {
                break;
            }
        }
    });

    let cancel = flow.cancel_token();
    let interrupt = tokio::spawn(async move {
        util::interrupted().await;
        cancel.cancel();
    });

    let result = flow.run(!replace).await;
    interrupt.abort();
    let _ = updates.await;

    match result {
        Ok(state) if state.is_success() => {
            spinner.finish_with_message(describe(&state));
            Ok(())
        }
        Ok(RegistrationState::Cancelled) => {
            spinner.abandon_with_message(describe(&RegistrationState::Cancelled));
            Ok(())
        }
        Ok(RegistrationState::TimedOut) => {
            spinner.abandon_with_message(describe(&RegistrationState::TimedOut));
            Err(CliError::Timeout)
        }
        Ok(other) => {
            spinner.abandon_with_message(describe(&other));
            Err(CliError::Internal(format!("registration ended as {other:?}")))
        }
        Err(e) => {
            spinner.abandon();
            Err(e.into())
        }
    }
}

async fn watch(session: &Session, global: &GlobalOpts) -> Result<(), CliError> {
    let mut ids = session.visible_device_ids().await?;
    let mut devices: Subscription<Vec<Device>> =
        session.devices().subscribe_devices_by_ids(&ids.latest()).await?;
    print_devices(&devices.latest(), session, global)?;

    loop {
        tokio::select! {
            () = util::interrupted() => return Ok(()),
            next = ids.changed() => {
                let Some(next) = next else { return Ok(()) };
                devices = session.devices().subscribe_devices_by_ids(&next).await?;
                print_devices(&devices.latest(), session, global)?;
            }
            next = devices.changed() => {
                let Some(next) = next else { return Ok(()) };
                print_devices(&next, session, global)?;
            }
        }
    }
}

// ── Handler ──────────────────────────────────────────────────────────

pub async fn handle(session: &Session, args: DevicesArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        DevicesCommand::List => {
            let devices = visible_devices(session).await?;
            print_devices(&devices, session, global)
        }

        DevicesCommand::Get { device } => {
            let device = require_device(session, &device).await?;
            let out = output::render_single(&global.output, &device, detail, |d| d.id.clone())?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        DevicesCommand::Health { device } => {
            require_device(session, &device).await?;
            let health = session.devices().subscribe_device_health(&device).await?.latest();
            let out = output::render_single(&global.output, &*health, health_detail, |h| {
                format!("{} {} {}", h.uptime, h.latency, h.signal_quality)
            })?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        DevicesCommand::Rename { device, name } => {
            session.devices().rename_device(&device, &name).await?;
            output::notice(&format!("Device renamed to '{}'", name.trim()), global.quiet);
            Ok(())
        }

        DevicesCommand::Delete { device } => {
            if !util::confirm(&format!("Delete device '{device}'?"), global.yes)? {
                return Ok(());
            }
            session.devices().delete_device(&device).await?;
            output::notice("Device deleted", global.quiet);
            Ok(())
        }

        DevicesCommand::Claim { code } => {
            let outcome = session.claims().claim(&code).await?;
            let message = match &outcome {
                ClaimOutcome::Claimed(_) => "Device claimed",
                ClaimOutcome::AlreadyOwned(_) => "You already own this device",
            };
            output::notice(message, global.quiet);
            let device = outcome.device();
            let out = output::render_single(&global.output, device, detail, |d| d.id.clone())?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        DevicesCommand::Release { device } => {
            if !util::confirm(
                &format!("Release device '{device}'? Anyone with its code can claim it."),
                global.yes,
            )? {
                return Ok(());
            }
            session.claims().unclaim(&device).await?;
            output::notice("Device released", global.quiet);
            Ok(())
        }

        DevicesCommand::Photo { device } => {
            let delivery = session.take_photo(&device).await?;
            output::notice(&util::delivery_message(delivery, "Photo request"), global.quiet);
            Ok(())
        }

        DevicesCommand::Enroll { device, replace } => {
            require_device(session, &device).await?;
            enroll(session, &device, replace, global).await
        }

        DevicesCommand::Watch => watch(session, global).await,
    }
}
