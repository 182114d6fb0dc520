//! 控制器模块
//!
//! 该模块把协调器接入 kube-runtime 的控制器循环：监听 PVC，并通过
//! [`crate::event_handler`] 中的映射函数把中间对象与 VolumeCloneSource
//! 的变化转成目标 PVC 的协调请求。同一个 PVC 的协调由运行时串行化，
//! 不同 PVC 之间的并发由信号量限制。

use anyhow::Result;
use cdi_common::consts::LABEL_OWNED_BY_UID;
use cdi_common::{Error, VolumeCloneSource, VolumeSnapshot};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use kube::{
    api::{Api, ListParams},
    client::Client,
    runtime::{
        controller::{Action, Controller as KubeController},
        watcher,
    },
    ResourceExt,
};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::event_handler::{targets_for_clone_source, targets_for_owned};
use crate::reconcile::{is_clone_target, ClonePopulatorReconciler};

/// 控制器名称，同时作为事件的 reporting controller
pub const CONTROLLER_NAME: &str = "clone-populator";

/// 协调函数共享的上下文
struct Context {
    reconciler: Arc<ClonePopulatorReconciler>,
    permits: Semaphore,
}

/// 克隆填充控制器
pub struct Controller {
    client: Client,
    reconciler: Arc<ClonePopulatorReconciler>,
    concurrency: usize,
}

impl Controller {
    pub fn new(client: Client, reconciler: Arc<ClonePopulatorReconciler>, concurrency: usize) -> Self {
        Self {
            client,
            reconciler,
            concurrency,
        }
    }

    /// 运行控制器直到收到 SIGTERM 或 ctrl-c
    pub async fn run(self) -> Result<()> {
        let claims: Api<PersistentVolumeClaim> = Api::all(self.client.clone());
        let controller = KubeController::new(claims, watcher::Config::default());
        let store = controller.store();

        let owned = watcher::Config::default().labels(LABEL_OWNED_BY_UID);
        let controller = controller
            .watches(
                Api::<PersistentVolumeClaim>::all(self.client.clone()),
                owned.clone(),
                {
                    let store = store.clone();
                    move |pvc| targets_for_owned(&pvc, &store)
                },
            )
            .watches(Api::<Pod>::all(self.client.clone()), owned.clone(), {
                let store = store.clone();
                move |pod| targets_for_owned(&pod, &store)
            })
            .watches(
                Api::<VolumeCloneSource>::all(self.client.clone()),
                watcher::Config::default(),
                {
                    let store = store.clone();
                    move |source| targets_for_clone_source(&source, &store)
                },
            );

        let controller = if snapshot_api_available(&self.client).await {
            controller.watches(Api::<VolumeSnapshot>::all(self.client.clone()), owned, {
                let store = store.clone();
                move |snapshot| targets_for_owned(&snapshot, &store)
            })
        } else {
            warn!("未安装卷快照 API，不监听 VolumeSnapshot");
            controller
        };

        let context = Arc::new(Context {
            reconciler: self.reconciler,
            permits: Semaphore::new(self.concurrency),
        });

        info!("启动 {} 控制器，并发数 {}", CONTROLLER_NAME, self.concurrency);
        controller
            .shutdown_on_signal()
            .run(reconcile, error_policy, context)
            .for_each(|result| async move {
                match result {
                    Ok((obj, action)) => debug!("协调完成 {}: {:?}", obj, action),
                    Err(e) => debug!("协调失败: {}", e),
                }
            })
            .await;
        info!("{} 控制器已停止", CONTROLLER_NAME);
        Ok(())
    }
}

async fn reconcile(pvc: Arc<PersistentVolumeClaim>, ctx: Arc<Context>) -> std::result::Result<Action, Error> {
    if !is_clone_target(&pvc) {
        return Ok(Action::await_change());
    }
    // 信号量不会被关闭
    let _permit = ctx.permits.acquire().await.ok();
    let namespace = pvc.namespace().unwrap_or_default();
    ctx.reconciler
        .reconcile(&namespace, &pvc.name_any())
        .await
        .map(Action::from)
}

fn error_policy(pvc: Arc<PersistentVolumeClaim>, error: &Error, ctx: Arc<Context>) -> Action {
    ctx.reconciler.handle_error(&pvc, error)
}

/// 快照 CRD 是否已安装
async fn snapshot_api_available(client: &Client) -> bool {
    let api: Api<VolumeSnapshot> = Api::all(client.clone());
    match api.list(&ListParams::default().limit(1)).await {
        Ok(_) => true,
        Err(e) => {
            debug!("探测卷快照 API 失败: {}", e);
            false
        }
    }
}
