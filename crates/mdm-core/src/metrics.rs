use metrics::{counter, gauge};

pub fn observe_errfatal_irq() {
    counter!("mdm_irq_errfatal_total").increment(1);
}

pub fn observe_status_irq() {
    counter!("mdm_irq_status_total").increment(1);
}

pub fn observe_false_alarm(path: &'static str) {
    counter!("mdm_false_alarm_total", "path" => path).increment(1);
}

pub fn observe_restart_trigger(reason: &'static str) {
    counter!("mdm_restart_trigger_total", "reason" => reason).increment(1);
}

pub fn observe_boot_timeout() {
    counter!("mdm_boot_timeout_total").increment(1);
}

pub fn observe_ramdump_timeout() {
    counter!("mdm_ramdump_timeout_total").increment(1);
}

pub fn record_ready(ready: bool) {
    gauge!("mdm_ready").set(if ready { 1.0 } else { 0.0 });
}
